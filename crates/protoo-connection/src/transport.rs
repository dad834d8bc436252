//! Transport seam -- how the connection manager obtains a frame sink/stream pair.
//!
//! [`WsTransport`] is the production implementation over tokio-tungstenite.
//! Tests plug in [`crate::MemoryTransport`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::endpoint::{Endpoint, InvalidUri};
use crate::frame::{CloseFrame, Frame};
use crate::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, TransportError>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open one connection. Resolves once the handshake is complete.
    async fn connect(&self, endpoint: &Endpoint) -> Result<(FrameSink, FrameStream), TransportError>;

    /// True when the transport replies to pings itself.
    fn answers_pings(&self) -> bool {
        false
    }
}

/// WebSocket client transport advertising a fixed subprotocol.
#[derive(Debug, Clone)]
pub struct WsTransport {
    subprotocol: String,
}

impl WsTransport {
    pub fn new(subprotocol: impl Into<String>) -> Self {
        Self {
            subprotocol: subprotocol.into(),
        }
    }

    pub fn subprotocol(&self) -> &str {
        &self.subprotocol
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<(FrameSink, FrameStream), TransportError> {
        let mut request = endpoint.as_str().into_client_request()?;
        let protocol = HeaderValue::from_str(&self.subprotocol).map_err(|e| InvalidUri {
            uri: endpoint.to_string(),
            reason: format!("bad subprotocol: {e}"),
        })?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);

        let (ws, response) = tokio_tungstenite::connect_async(request).await?;
        tracing::debug!(
            url = %endpoint,
            status = %response.status(),
            "websocket handshake complete"
        );

        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(to_message(frame))));
        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(message) => from_message(message).map(Ok),
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });
        Ok((Box::pin(sink), Box::pin(stream)))
    }

    fn answers_pings(&self) -> bool {
        true
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping(payload) => Message::Ping(payload.into()),
        Frame::Pong(payload) => Message::Pong(payload.into()),
        Frame::Close(close) => Message::Close(close.map(|c| WsCloseFrame {
            code: CloseCode::from(c.code),
            reason: c.reason.into(),
        })),
    }
}

fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(Frame::Binary(bytes.to_vec())),
        Message::Ping(payload) => Some(Frame::Ping(payload.to_vec())),
        Message::Pong(payload) => Some(Frame::Pong(payload.to_vec())),
        Message::Close(close) => Some(Frame::Close(close.map(|c| CloseFrame {
            code: u16::from(c.code),
            reason: c.reason.as_str().to_owned(),
        }))),
        // Raw frames only surface when writing.
        Message::Frame(_) => None,
    }
}
