//! Application callbacks registered on a Peer.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use protoo_connection::{CloseCause, TransportError};
use protoo_protocol::{
    encode_text, encode_text_with_data, DataMessage, Notification, ProtocolError, Received,
    Request,
};
use serde::Serialize;
use serde_json::Value;

/// Answer to an inbound request.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Success, optionally with a payload.
    Ok(Option<Value>),
    /// Error response with an application error code.
    Reject { code: i64, reason: Option<String> },
}

impl Reply {
    /// Success without payload.
    pub fn empty() -> Self {
        Reply::Ok(None)
    }

    pub fn ok<T: Serialize>(data: &T) -> Result<Self, serde_json::Error> {
        Ok(Reply::Ok(Some(serde_json::to_value(data)?)))
    }

    pub fn reject(code: i64, reason: impl Into<String>) -> Self {
        Reply::Reject {
            code,
            reason: Some(reason.into()),
        }
    }

    /// Wire text of the response to `request`.
    pub fn encode_for(&self, request: &Request) -> Result<String, ProtocolError> {
        match self {
            Reply::Ok(None) => encode_text(&request.reply_ok().into()),
            Reply::Ok(Some(data)) => {
                encode_text_with_data(&DataMessage::new(request.reply_ok(), data))
            }
            Reply::Reject { code, reason } => {
                encode_text(&request.reply_error(*code, reason.clone()).into())
            }
        }
    }
}

pub type RequestFuture = BoxFuture<'static, anyhow::Result<Reply>>;

type LifecycleFn = Arc<dyn Fn() + Send + Sync>;
type FailedFn = Arc<dyn Fn(u32, &TransportError) + Send + Sync>;
type CloseFn = Arc<dyn Fn(CloseCause) + Send + Sync>;
type RequestFn = Arc<dyn Fn(Received<Request>) -> RequestFuture + Send + Sync>;
type NotificationFn = Arc<dyn Fn(Received<Notification>) -> anyhow::Result<()> + Send + Sync>;

/// Callback set, built once and handed to [`crate::Peer`].
///
/// Unset request handler: every inbound request gets 404 "not found".
/// Request handler errors and panics become 500 responses.
#[derive(Clone, Default)]
pub struct PeerHandlers {
    pub(crate) on_open: Option<LifecycleFn>,
    pub(crate) on_failed: Option<FailedFn>,
    pub(crate) on_disconnected: Option<LifecycleFn>,
    pub(crate) on_close: Option<CloseFn>,
    pub(crate) on_request: Option<RequestFn>,
    pub(crate) on_notification: Option<NotificationFn>,
}

impl PeerHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_failed(mut self, f: impl Fn(u32, &TransportError) + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Arc::new(f));
        self
    }

    pub fn on_disconnected(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(CloseCause) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_request<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Received<Request>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        self.on_request = Some(Arc::new(
            move |request: Received<Request>| -> RequestFuture { Box::pin(f(request)) },
        ));
        self
    }

    pub fn on_notification(
        mut self,
        f: impl Fn(Received<Notification>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_notification = Some(Arc::new(f));
        self
    }
}
