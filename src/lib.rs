//! # udsocket-rpc
//!
//! Request/response messaging between processes over Unix domain sockets.
//!
//! Either end of a connection can send JSON requests and answer the peer's
//! requests with an installed handler. Messages travel as length-prefixed
//! frames whose payload is a `{id, data, error}` JSON envelope.
//!
//! ## Architecture
//!
//! - **Framing** ([`protocol`]): fixed-width length header, arena-backed
//!   encoder, reassembling decoder
//! - **Channel** ([`RpcChannel`]): pending-call table, read loop, dispatch
//!   to handlers, dedicated writer task
//! - **Listener** ([`RpcListener`]): binds a socket path and turns every
//!   accepted connection into a channel
//!
//! ## Example
//!
//! ```no_run
//! use udsocket_rpc::{ChannelConfig, RpcChannel, RpcListener};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> udsocket_rpc::Result<()> {
//!     let listener = RpcListener::builder()
//!         .handler(|data| async move { Ok(json!({ "echo": data })) })
//!         .start("/tmp/echo.sock")
//!         .await?;
//!
//!     let client = RpcChannel::connect("/tmp/echo.sock", ChannelConfig::default()).await?;
//!     let reply = client.call(&json!("hello")).await?;
//!     assert_eq!(reply, json!({ "echo": "hello" }));
//!
//!     client.close();
//!     listener.close();
//!     listener.wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod pending;
pub mod protocol;
#[cfg(unix)]
pub mod transport;
pub mod writer;

mod channel;
#[cfg(unix)]
mod listener;
mod shutdown;

pub use channel::RpcChannel;
pub use config::{ChannelConfig, ChannelOptions};
pub use error::{RemoteError, Result, RpcError};
pub use handler::{HandlerError, HandlerResult};
#[cfg(unix)]
pub use listener::{ListenerBuilder, RpcListener};
