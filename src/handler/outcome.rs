//! Handler failures and their wire representation.
//!
//! Whatever a handler does (return a value, return an error, panic) ends up
//! as one response envelope. Nothing escapes into the read loop.

use std::fmt;

use serde_json::{json, Value};

use crate::error::RpcError;

/// Code sent when a handler panics.
pub const PANIC_CODE: &str = "EPANIC";

/// Code sent when a typed handler cannot deserialize its input.
pub const INVALID_INPUT_CODE: &str = "EINVAL";

/// Code sent when the response exceeds the payload limit.
pub const TOO_LARGE_CODE: &str = "E2BIG";

/// Code sent when the channel is at its handler concurrency limit.
pub const BUSY_CODE: &str = "EBUSY";

/// Code sent when a handler task is cancelled before finishing.
pub const CANCELED_CODE: &str = "ECANCELED";

/// Result type for handler functions.
pub type HandlerResult = std::result::Result<Value, HandlerError>;

/// Error returned by a request handler.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerError {
    /// Structured failure, sent as `{"code": ..., "message": ...}`.
    Failure {
        /// Error code or class.
        code: Option<String>,
        /// Human readable message.
        message: String,
    },
    /// Arbitrary value sent verbatim as the `error` field.
    Raw(Value),
}

impl HandlerError {
    /// Structured error with a code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Failure {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Structured error without a code.
    pub fn message(message: impl Into<String>) -> Self {
        HandlerError::Failure {
            code: None,
            message: message.into(),
        }
    }

    /// Pass a value through as the `error` field unchanged.
    pub fn raw(value: impl Into<Value>) -> Self {
        HandlerError::Raw(value.into())
    }

    /// Value placed in the response envelope's `error` field.
    pub fn to_wire(&self) -> Value {
        match self {
            HandlerError::Failure {
                code: Some(code),
                message,
            } => json!({
                "code": code,
                "message": message,
            }),
            HandlerError::Failure {
                code: None,
                message,
            } => json!({ "message": message }),
            HandlerError::Raw(value) => value.clone(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Failure {
                code: Some(code),
                message,
            } => write!(f, "[{}] {}", code, message),
            HandlerError::Failure {
                code: None,
                message,
            } => f.write_str(message),
            HandlerError::Raw(value) => write!(f, "{}", value),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<RpcError> for HandlerError {
    /// Errors from nested calls keep the remote code when there is one.
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote(remote) => HandlerError::Failure {
                code: remote.code,
                message: remote.message,
            },
            RpcError::Timeout { .. } => HandlerError::new("ETIMEDOUT", err.to_string()),
            RpcError::ChannelClosed => HandlerError::new("ECLOSED", err.to_string()),
            RpcError::PayloadTooLarge { .. } => HandlerError::new(TOO_LARGE_CODE, err.to_string()),
            RpcError::Json(_) => HandlerError::new(INVALID_INPUT_CODE, err.to_string()),
            other => HandlerError::new("EINTERNAL", other.to_string()),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::new(INVALID_INPUT_CODE, err.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        HandlerError::new(format!("{:?}", err.kind()), err.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::message(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::message(message)
    }
}

/// Describe a panic payload caught from a handler task.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
