//! Transport module - Unix domain socket handling.
//!
//! Provides the socket listener used by [`RpcListener`](crate::RpcListener)
//! and a helper for picking a fresh socket path.

mod pipe;

pub use pipe::{generate_socket_path, PipeListener};
