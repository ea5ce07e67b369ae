//! Codec module - envelope serialization.
//!
//! - [`JsonCodec`] - standard JSON via `serde_json`, used for every read
//! - [`Serializer`] - injectable write-path hook, JSON by default
//!
//! # Design
//!
//! Reading and writing are deliberately asymmetric: a custom serializer
//! may produce the wire text faster (precomputed fragments, a different
//! JSON backend), but whatever it emits must still parse as standard JSON
//! on the other side.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use udsocket_rpc::codec::{JsonCodec, Serializer};
//! use udsocket_rpc::protocol::Envelope;
//! use serde_json::json;
//!
//! let pretty: Serializer = Arc::new(|envelope: &Envelope| -> udsocket_rpc::Result<Vec<u8>> {
//!     Ok(serde_json::to_vec_pretty(envelope)?)
//! });
//!
//! let envelope = Envelope::request("a-1", json!({"x": 1}));
//! let bytes = pretty(&envelope).unwrap();
//! let back: Envelope = JsonCodec::decode(&bytes).unwrap();
//! assert_eq!(back, envelope);
//! ```

mod json;

use std::sync::Arc;

use crate::error::Result;
use crate::protocol::Envelope;

pub use json::JsonCodec;

/// Maps an envelope to its wire representation.
pub type Serializer = Arc<dyn Fn(&Envelope) -> Result<Vec<u8>> + Send + Sync>;

/// The standard JSON serializer.
pub fn json_serializer() -> Serializer {
    Arc::new(|envelope: &Envelope| JsonCodec::encode(envelope))
}
