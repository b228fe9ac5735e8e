// Error types shared by the bridge, the proxy and the object model

use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`ScriptSession`](crate::wapi::session::ScriptSession).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The page threw (or rejected) while evaluating the script
    #[error("script error: {0}")]
    Script(String),

    /// The page did not signal completion in time
    #[error("script timed out after {0:?}")]
    Timeout(Duration),

    /// The channel to the page is broken
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors surfaced by the WAPI bridge
#[derive(Debug, Error)]
pub enum WapiError {
    /// An argument could not be written as a JS literal
    #[error("unsupported argument type: {kind}")]
    UnsupportedValueType { kind: &'static str },

    /// The name is not defined in the injected WAPI namespace
    #[error("function {name} doesn't exist in WAPI")]
    NoSuchCapability { name: String },

    /// The page failed or timed out while running a WAPI function
    #[error("error in function {capability} ({message}). Command: {command}")]
    RemoteInvocation {
        capability: String,
        message: String,
        command: String,
    },

    /// A raw payload lacked a field its variant needs
    #[error("malformed {variant} payload: missing or invalid field '{field}'")]
    MalformedPayload {
        field: &'static str,
        variant: &'static str,
    },

    /// The operation is not available for this object
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The page answered a lookup with nothing
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    /// Bundle injection or discovery failed
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("base64 decoding error: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl WapiError {
    pub(crate) fn malformed(field: &'static str, variant: &'static str) -> Self {
        WapiError::MalformedPayload { field, variant }
    }
}

pub type Result<T> = std::result::Result<T, WapiError>;
