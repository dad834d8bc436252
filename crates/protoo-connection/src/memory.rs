//! In-process transport for tests and embedding.
//!
//! Each successful connect hands a [`MemoryRemote`] to the [`MemoryListener`];
//! the remote plays the server side of that one connection.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc as tokio_mpsc;

use crate::endpoint::Endpoint;
use crate::frame::Frame;
use crate::transport::{FrameSink, FrameStream, Transport};
use crate::TransportError;

pub struct MemoryTransport {
    refusals: Mutex<VecDeque<String>>,
    attempts: AtomicU32,
    accepted: tokio_mpsc::UnboundedSender<MemoryRemote>,
}

pub struct MemoryListener {
    rx: tokio_mpsc::UnboundedReceiver<MemoryRemote>,
}

/// Server end of one in-memory connection. Dropping it ends the client's stream.
pub struct MemoryRemote {
    endpoint: Endpoint,
    from_client: mpsc::UnboundedReceiver<Frame>,
    to_client: mpsc::UnboundedSender<Result<Frame, TransportError>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryListener) {
        let (accepted, rx) = tokio_mpsc::unbounded_channel();
        let transport = Self {
            refusals: Mutex::new(VecDeque::new()),
            attempts: AtomicU32::new(0),
            accepted,
        };
        (transport, MemoryListener { rx })
    }

    /// Fail the next connect attempt with `reason`. Calls queue up.
    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.refusals.lock().push_back(reason.into());
    }

    /// Connect attempts seen so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<(FrameSink, FrameStream), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self.refusals.lock().pop_front();
        if let Some(reason) = refused {
            return Err(TransportError::Refused(reason));
        }

        let (to_server, from_client) = mpsc::unbounded();
        let (to_client, from_server) = mpsc::unbounded();
        let remote = MemoryRemote {
            endpoint: endpoint.clone(),
            from_client,
            to_client,
        };
        self.accepted
            .send(remote)
            .map_err(|_| TransportError::Refused("listener gone".into()))?;

        let sink = to_server.sink_map_err(|_| TransportError::Closed);
        Ok((Box::pin(sink), Box::pin(from_server)))
    }
}

impl MemoryListener {
    pub async fn accept(&mut self) -> Option<MemoryRemote> {
        self.rx.recv().await
    }
}

impl MemoryRemote {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Push a frame to the client. False once the client side is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_client.unbounded_send(Ok(frame)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Frame::Text(text.into()))
    }

    /// Next frame written by the client; `None` once the client dropped its sink.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.next().await
    }

    /// Next text frame, skipping control frames.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Abort the connection without a close handshake.
    pub fn break_connection(self, reason: &str) {
        let error = io::Error::new(io::ErrorKind::ConnectionReset, reason.to_owned());
        let _ = self.to_client.unbounded_send(Err(TransportError::Io(error)));
    }

    /// Send a close frame and hang up.
    pub fn close(self) {
        let _ = self.to_client.unbounded_send(Ok(Frame::Close(None)));
    }
}
