//! Handler module - inbound request handling.
//!
//! Provides:
//! - [`Handler`] - trait implemented by anything that answers requests
//! - [`FnHandler`], [`SyncHandler`], [`TypedHandler`] - closure adapters
//! - [`HandlerSlot`] - the single replaceable handler of a channel
//! - [`HandlerError`] - handler failures and their wire form
//!
//! # Example
//!
//! ```ignore
//! use udsocket_rpc::handler::HandlerError;
//!
//! channel.set_handler(|data| async move {
//!     match data.get("x") {
//!         Some(x) => Ok(json!({ "x": x })),
//!         None => Err(HandlerError::new("EINVAL", "missing x")),
//!     }
//! });
//! ```

mod outcome;
mod registry;

pub use outcome::{
    HandlerError, HandlerResult, BUSY_CODE, CANCELED_CODE, INVALID_INPUT_CODE, PANIC_CODE,
    TOO_LARGE_CODE,
};
pub(crate) use outcome::panic_message;
pub use registry::{BoxFuture, FnHandler, Handler, HandlerSlot, SyncHandler, TypedHandler};
