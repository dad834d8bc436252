//! protoo Protocol -- wire types and JSON codec.
//!
//! One JSON object per WebSocket text frame. Boolean marker fields
//! (`request` / `response` / `notification`) select the message kind; an
//! optional `data` field carries the application payload at the same level.

pub mod codec;
pub mod messages;

pub use codec::{
    decode, decode_with_data, encode, encode_text, encode_text_with_data, encode_with_data,
};
pub use messages::*;

/// WebSocket subprotocol advertised in `Sec-WebSocket-Protocol`.
pub const SUBPROTOCOL: &str = "protoo";

/// Error code used when no request handler is registered.
pub const NOT_FOUND_CODE: i64 = 404;

/// Reason sent alongside [`NOT_FOUND_CODE`].
pub const NOT_FOUND_REASON: &str = "not found";

/// Error code used when a request handler fails.
pub const INTERNAL_ERROR_CODE: i64 = 500;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ProtocolError::InvalidMessage(reason.into())
    }
}
