//! JSON codec for protoo messages.
//!
//! Wire format: one flat JSON object per message.
//!   request:      {"request":true,"method":..,"id":..}
//!   response ok:  {"response":true,"ok":true,"id":..}
//!   response err: {"response":true,"ok":false,"id":..,"errorCode":..,"errorReason":..}
//!   notification: {"notification":true,"method":..}
//! plus an optional top-level `data` field with the application payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messages::{
    DataMessage, Message, Notification, Request, Response, ResponseResult,
};
use crate::ProtocolError;

/// Field holding the application payload.
const DATA_FIELD: &str = "data";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default, skip_serializing_if = "is_false")]
    request: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    response: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    notification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
}

#[derive(Deserialize)]
struct PayloadOnly {
    #[serde(default)]
    data: Value,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        match message {
            Message::Request(r) => WireMessage {
                request: true,
                method: Some(r.method.clone()),
                id: Some(r.id),
                ..Default::default()
            },
            Message::Response(r) => match &r.result {
                ResponseResult::Success => WireMessage {
                    response: true,
                    ok: Some(true),
                    id: Some(r.id),
                    ..Default::default()
                },
                ResponseResult::Error { code, reason } => WireMessage {
                    response: true,
                    ok: Some(false),
                    id: Some(r.id),
                    error_code: Some(*code),
                    error_reason: reason.clone(),
                    ..Default::default()
                },
            },
            Message::Notification(n) => WireMessage {
                notification: true,
                method: Some(n.method.clone()),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = ProtocolError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        match (wire.request, wire.response, wire.notification) {
            (true, false, false) => Ok(Message::Request(Request {
                method: wire
                    .method
                    .ok_or_else(|| ProtocolError::invalid("request without method"))?,
                id: wire
                    .id
                    .ok_or_else(|| ProtocolError::invalid("request without id"))?,
            })),
            (false, true, false) => {
                let id = wire
                    .id
                    .ok_or_else(|| ProtocolError::invalid("response without id"))?;
                let ok = wire
                    .ok
                    .ok_or_else(|| ProtocolError::invalid("response without ok flag"))?;
                let result = if ok {
                    ResponseResult::Success
                } else {
                    ResponseResult::Error {
                        code: wire.error_code.ok_or_else(|| {
                            ProtocolError::invalid("error response without errorCode")
                        })?,
                        reason: wire.error_reason,
                    }
                };
                Ok(Message::Response(Response { id, result }))
            }
            (false, false, true) => Ok(Message::Notification(Notification {
                method: wire
                    .method
                    .ok_or_else(|| ProtocolError::invalid("notification without method"))?,
            })),
            (false, false, false) => Err(ProtocolError::invalid("no message kind marker")),
            _ => Err(ProtocolError::invalid("ambiguous message kind")),
        }
    }
}

/// Encode a bare message.
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    encode_text(message).map(String::into_bytes)
}

/// Encode a bare message as the text of a WebSocket frame.
pub fn encode_text(message: &Message) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&WireMessage::from(message))?)
}

/// Encode a message with its payload merged in as the `data` field.
pub fn encode_with_data<T: Serialize>(message: &DataMessage<T>) -> Result<Vec<u8>, ProtocolError> {
    encode_text_with_data(message).map(String::into_bytes)
}

/// Text form of [`encode_with_data`].
pub fn encode_text_with_data<T: Serialize>(message: &DataMessage<T>) -> Result<String, ProtocolError> {
    let mut value = serde_json::to_value(WireMessage::from(&message.message))?;
    let data = serde_json::to_value(&message.data)?;
    match &mut value {
        Value::Object(fields) => {
            fields.insert(DATA_FIELD.to_owned(), data);
        }
        _ => return Err(ProtocolError::invalid("message did not encode as an object")),
    }
    Ok(serde_json::to_string(&value)?)
}

/// Decode a message, ignoring any payload.
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    let wire: WireMessage = serde_json::from_slice(bytes)?;
    Message::try_from(wire)
}

/// Decode a message together with its payload.
pub fn decode_with_data<T: DeserializeOwned>(bytes: &[u8]) -> Result<DataMessage<T>, ProtocolError> {
    let mut value: Value = serde_json::from_slice(bytes)?;
    let data = match &mut value {
        Value::Object(fields) => fields.remove(DATA_FIELD).unwrap_or(Value::Null),
        _ => return Err(ProtocolError::invalid("message is not a JSON object")),
    };
    let wire: WireMessage = serde_json::from_value(value)?;
    Ok(DataMessage {
        message: Message::try_from(wire)?,
        data: serde_json::from_value(data)?,
    })
}

/// Decode only the payload of an already-validated message.
pub(crate) fn decode_data<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let payload: PayloadOnly = serde_json::from_slice(bytes)?;
    Ok(serde_json::from_value(payload.data)?)
}
