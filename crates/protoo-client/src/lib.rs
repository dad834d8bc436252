//! protoo Client -- signaling peer over a reconnecting WebSocket.
//!
//! Re-exports the pieces applications need: [`Peer`], its callback set,
//! configuration, and the protocol and connection types they touch.

pub mod config;
pub mod handler;
pub mod peer;
pub mod pending;

use std::path::PathBuf;

pub use handler::{PeerHandlers, Reply, RequestFuture};
pub use peer::Peer;
pub use protoo_connection::{CloseCause, InvalidUri, RetryPolicy, TransportError};
pub use protoo_protocol::{Notification, ProtocolError, Received, Request, Response};

use protoo_connection::ConnectionError;

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer is not connected")]
    Closed,
    #[error("request `{method}` (id {id}) timed out")]
    Timeout { method: String, id: u32 },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    InvalidUri(#[from] InvalidUri),
}

impl From<ConnectionError> for PeerError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::InvalidUri(uri) => PeerError::InvalidUri(uri),
            ConnectionError::NotConnected | ConnectionError::Transport(_) => PeerError::Closed,
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
