//! The `{id, data, error}` message carried in every frame payload.
//!
//! ```text
//! request:   {"id":"<seed>-<chan>-<n>","data":{...}}
//! success:   {"id":"<seed>-<chan>-<n>","data":{...}}
//! failure:   {"id":"<seed>-<chan>-<n>","data":null,"error":{"code":"E..","message":".."}}
//! ```
//!
//! Requests and responses share one shape; whether an inbound envelope is a
//! response is decided by the receiving channel's pending-call table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RpcError};

/// Logical request/response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id; absent for notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Request or response body.
    #[serde(default)]
    pub data: Value,
    /// Failure reported by a handler; absent or `null` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Envelope {
    /// Outgoing request with a correlation id.
    pub fn request(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: Some(Value::String(id.into())),
            data,
            error: None,
        }
    }

    /// Successful response echoing the request id.
    pub fn success(id: Option<Value>, data: Value) -> Self {
        Self {
            id,
            data,
            error: None,
        }
    }

    /// Failed response echoing the request id.
    pub fn failure(id: Option<Value>, error: Value) -> Self {
        Self {
            id,
            data: Value::Null,
            error: Some(error),
        }
    }

    /// Parse a frame payload.
    ///
    /// Anything but a JSON object is a protocol error.
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)?;
        if !value.is_object() {
            return Err(RpcError::Protocol(format!(
                "envelope must be a JSON object, got {}",
                json_kind(&value)
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Correlation key: strings as-is, numbers by their decimal text.
    pub fn key(&self) -> Option<String> {
        match self.id.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// True if the envelope reports a failure.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_error() {
        let envelope = Envelope::request("a-1", json!({"x": 1}));
        let text = serde_json::to_string(&envelope).unwrap();
        assert_eq!(text, r#"{"id":"a-1","data":{"x":1}}"#);
    }

    #[test]
    fn test_null_error_means_success() {
        let envelope = Envelope::from_slice(br#"{"id":"a-1","data":2,"error":null}"#).unwrap();
        assert!(!envelope.is_error());
        assert_eq!(envelope.data, json!(2));
    }

    #[test]
    fn test_missing_data_is_null() {
        let envelope = Envelope::from_slice(br#"{"id":"a-1"}"#).unwrap();
        assert_eq!(envelope.data, Value::Null);
    }

    #[test]
    fn test_numeric_id_key() {
        let envelope = Envelope::from_slice(br#"{"id":17,"data":null}"#).unwrap();
        assert_eq!(envelope.key().as_deref(), Some("17"));
    }

    #[test]
    fn test_notification_has_no_key() {
        let envelope = Envelope::from_slice(br#"{"data":"hello"}"#).unwrap();
        assert_eq!(envelope.key(), None);
    }

    #[test]
    fn test_positional_envelope_rejected() {
        let err = Envelope::from_slice(br#"["a-1",{"x":1},null]"#).unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            Envelope::from_slice(b"{not json"),
            Err(RpcError::Json(_))
        ));
    }
}
