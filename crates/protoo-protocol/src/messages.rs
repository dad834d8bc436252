//! In-memory message model.
//!
//! The wire shape lives in `codec`; these types only carry what each kind
//! needs. Payloads travel separately, either as a [`DataMessage`] on encode or
//! lazily through [`Received::data`] on decode.

use std::ops::Deref;

use serde::de::DeserializeOwned;

use crate::{codec, ProtocolError};

// ============================================================================
// Messages
// ============================================================================

/// One protoo message: exactly one of the three kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    /// Kind name as used for the wire marker field.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::Notification(_) => "notification",
        }
    }

    /// Correlation id. Notifications carry none.
    pub fn id(&self) -> Option<u32> {
        match self {
            Message::Request(r) => Some(r.id),
            Message::Response(r) => Some(r.id),
            Message::Notification(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub id: u32,
}

impl Request {
    pub fn new(method: impl Into<String>, id: u32) -> Self {
        Self {
            method: method.into(),
            id,
        }
    }

    /// Successful response correlated with this request.
    pub fn reply_ok(&self) -> Response {
        Response::success(self.id)
    }

    /// Failed response correlated with this request.
    pub fn reply_error(&self, code: i64, reason: Option<String>) -> Response {
        Response::error(self.id, code, reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: u32,
    pub result: ResponseResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseResult {
    Success,
    Error { code: i64, reason: Option<String> },
}

impl Response {
    pub fn success(id: u32) -> Self {
        Self {
            id,
            result: ResponseResult::Success,
        }
    }

    pub fn error(id: u32, code: i64, reason: Option<String>) -> Self {
        Self {
            id,
            result: ResponseResult::Error { code, reason },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, ResponseResult::Success)
    }

    pub fn error_code(&self) -> Option<i64> {
        match &self.result {
            ResponseResult::Success => None,
            ResponseResult::Error { code, .. } => Some(*code),
        }
    }

    pub fn error_reason(&self) -> Option<&str> {
        match &self.result {
            ResponseResult::Success => None,
            ResponseResult::Error { reason, .. } => reason.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub method: String,
}

impl Notification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Message::Notification(n)
    }
}

// ============================================================================
// Payload carriers
// ============================================================================

/// A message paired with an application payload, encoded as a sibling `data`
/// field of the message object.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage<T> {
    pub message: Message,
    pub data: T,
}

impl<T> DataMessage<T> {
    pub fn new(message: impl Into<Message>, data: T) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

/// A decoded inbound message that keeps its wire bytes, so the payload can be
/// interpreted later as whatever type the receiver expects.
#[derive(Debug, Clone)]
pub struct Received<M> {
    message: M,
    raw: Vec<u8>,
}

impl<M> Received<M> {
    pub fn new(message: M, raw: Vec<u8>) -> Self {
        Self { message, raw }
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn into_message(self) -> M {
        self.message
    }

    /// The JSON object exactly as it arrived.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Deserialize the `data` field. A missing field reads as `null`, so
    /// `Option<T>` and `()` accept payload-less messages.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        codec::decode_data(&self.raw)
    }
}

impl<M> Deref for Received<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.message
    }
}
