// Typed views over the raw objects returned by WAPI

pub mod chat;
pub mod id;
pub mod message;

pub use chat::{Chat, Contact, MessageGroup};
pub use id::Id;
pub use message::{
    classify, ContactCardMessage, MediaMessage, Message, MessageHeader, MessageKind,
    TextMessage, VoiceMessage,
};

use serde_json::Value;

use crate::error::{Result, WapiError};

// Field accessors that name the variant being built when a field is missing

pub(crate) fn required<'a>(
    payload: &'a Value,
    field: &'static str,
    variant: &'static str,
) -> Result<&'a Value> {
    match payload.get(field) {
        Some(Value::Null) | None => Err(WapiError::malformed(field, variant)),
        Some(value) => Ok(value),
    }
}

pub(crate) fn required_str<'a>(
    payload: &'a Value,
    field: &'static str,
    variant: &'static str,
) -> Result<&'a str> {
    required(payload, field, variant)?
        .as_str()
        .ok_or_else(|| WapiError::malformed(field, variant))
}

pub(crate) fn optional_str(payload: &Value, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn flag(payload: &Value, field: &str) -> bool {
    payload.get(field).and_then(Value::as_bool).unwrap_or(false)
}
