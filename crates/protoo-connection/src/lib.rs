//! protoo Connection -- reconnecting transport with a fan-out event stream.
//!
//! One [`ConnectionManager`] per logical session. A background cycle task
//! connects through a [`Transport`], relays frames as [`ConnectionEvent`]s and
//! retries with exponential backoff until the session ends for good.
//! Idle → Connecting → Connected → Connecting → ... → Idle.

pub mod endpoint;
pub mod events;
pub mod frame;
pub mod manager;
pub mod memory;
pub mod policy;
pub mod transport;

pub use endpoint::{Endpoint, InvalidUri};
pub use events::{CloseCause, ConnectionEvent, EventBus, EventStream};
pub use frame::{CloseFrame, Frame};
pub use manager::{ConnectionManager, ConnectionState, Link};
pub use memory::{MemoryListener, MemoryRemote, MemoryTransport};
pub use policy::{RetryPolicy, DEFAULT_RETRY_POLICY};
pub use transport::{FrameSink, FrameStream, Transport, WsTransport};

use tokio_tungstenite::tungstenite;

/// Failure below the connection manager: connect, handshake, read or write.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    InvalidUri(#[from] InvalidUri),
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether another connect attempt can succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::InvalidUri(_) => false,
            TransportError::WebSocket(e) => !matches!(**e, tungstenite::Error::Url(_)),
            _ => true,
        }
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        TransportError::WebSocket(Box::new(e))
    }
}

/// Errors returned to callers of the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    InvalidUri(#[from] InvalidUri),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
