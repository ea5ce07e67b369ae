//! JSON codec using `serde_json`.
//!
//! Reads always go through [`JsonCodec::decode`]. Writes go through the
//! channel's [`Serializer`](super::Serializer), which defaults to
//! [`JsonCodec::encode`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// JSON codec for envelopes and payload values.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to compact JSON bytes.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode JSON bytes into `T`.
    #[inline]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Convert any serializable value into a JSON tree.
    #[inline]
    pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
        Ok(serde_json::to_value(value)?)
    }

    /// Convert a JSON tree into `T`.
    #[inline]
    pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T> {
        Ok(serde_json::from_value(value)?)
    }
}
