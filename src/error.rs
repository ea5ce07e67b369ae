//! Error types for udsocket-rpc.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Main error type for all channel, codec and listener operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload exceeds the configured maximum; nothing was written.
    #[error("Payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// No response arrived before the call deadline.
    #[error("RPC timeout after {}ms (call {id})", timeout.as_millis())]
    Timeout { id: String, timeout: Duration },

    /// The channel is closed; the call was rejected without touching the socket.
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer's handler failed.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// Malformed header, frame or envelope.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RpcError {
    /// Returns the remote error if this call was rejected by the peer's handler.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            RpcError::Remote(remote) => Some(remote),
            _ => None,
        }
    }

    /// True for [`RpcError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

/// Error reported by the peer in a response envelope's `error` field.
///
/// Structured errors (`{"code": ..., "message": ...}`) expose their code and
/// message; a plain string becomes the message. The verbatim wire value is
/// kept in `raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Error code or class, if the peer sent one.
    pub code: Option<String>,
    /// Human readable message.
    pub message: String,
    /// The `error` value exactly as received.
    pub raw: Value,
}

impl RemoteError {
    /// Build from the `error` field of a response envelope.
    pub fn from_wire(value: Value) -> Self {
        let (code, message) = match &value {
            Value::String(s) => (None, s.clone()),
            Value::Object(map) => {
                let code = map.get("code").and_then(scalar_text);
                let message = map
                    .get("message")
                    .and_then(scalar_text)
                    .unwrap_or_else(|| value.to_string());
                (code, message)
            }
            other => (None, other.to_string()),
        };

        Self {
            code,
            message,
            raw: value,
        }
    }

    /// True if the peer sent this exact code.
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
