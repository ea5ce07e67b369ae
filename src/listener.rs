//! Listener builder and accept loop.
//!
//! The [`ListenerBuilder`] provides a fluent API for configuring the
//! channels a listener produces. [`RpcListener`] manages the lifecycle:
//! 1. Unlink a stale socket file and bind
//! 2. Accept connections, wrapping each in an [`RpcChannel`]
//! 3. Install the default handler and hand the channel to `on_connection`
//! 4. Start the channel's read loop
//!
//! Closing the listener stops accepting and removes the socket file.
//! Channels already accepted stay open.
//!
//! # Example
//!
//! ```no_run
//! use udsocket_rpc::RpcListener;
//! use serde_json::json;
//!
//! # async fn run() -> udsocket_rpc::Result<()> {
//! let listener = RpcListener::builder()
//!     .handler(|data| async move { Ok(json!({ "echo": data })) })
//!     .on_connection(|channel| tracing::info!("accepted {:?}", channel))
//!     .on_error(|err| tracing::warn!("listener error: {}", err))
//!     .start("/tmp/app.sock")
//!     .await?;
//!
//! listener.wait_for_shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::channel::RpcChannel;
use crate::config::ChannelConfig;
use crate::error::{Result, RpcError};
use crate::handler::{FnHandler, Handler, HandlerResult};
use crate::protocol::HeaderFormat;
use crate::shutdown::Shutdown;
use crate::transport::PipeListener;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

type ConnectionCallback = Arc<dyn Fn(RpcChannel) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&RpcError) + Send + Sync>;
type CloseCallback = Arc<dyn Fn() + Send + Sync>;

/// Builder for configuring and starting an [`RpcListener`].
#[derive(Default)]
pub struct ListenerBuilder {
    config: ChannelConfig,
    handler: Option<Arc<dyn Handler>>,
    on_connection: Option<ConnectionCallback>,
    on_error: Option<ErrorCallback>,
    on_close: Option<CloseCallback>,
}

impl ListenerBuilder {
    /// Create a new listener builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration cloned into every accepted channel.
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the call timeout of accepted channels.
    ///
    /// Default: 5000 ms
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the header layout of accepted channels.
    ///
    /// Default: [`HeaderFormat::Binary`]
    pub fn header_format(mut self, format: HeaderFormat) -> Self {
        self.config.header_format = format;
        self
    }

    /// Set the maximum payload size of accepted channels.
    ///
    /// Default: 1 MiB
    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.config.max_payload_size = max;
        self
    }

    /// Handler installed on every accepted channel.
    ///
    /// `on_connection` may still replace it per channel.
    pub fn handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler = Some(Arc::new(FnHandler::new(handler)));
        self
    }

    /// Shared handler installed on every accepted channel.
    pub fn shared_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Called for each accepted channel before it starts reading.
    pub fn on_connection<F>(mut self, callback: F) -> Self
    where
        F: Fn(RpcChannel) + Send + Sync + 'static,
    {
        self.on_connection = Some(Arc::new(callback));
        self
    }

    /// Called for bind and accept failures, and for channels that could not
    /// be set up.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RpcError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Called once the listener has stopped accepting.
    pub fn on_close<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(callback));
        self
    }

    /// Bind the socket and start accepting.
    ///
    /// Any existing file at `path` is removed first.
    pub async fn start(self, path: impl AsRef<Path>) -> Result<RpcListener> {
        self.config.validate()?;

        let pipe = match PipeListener::bind(path.as_ref()).await {
            Ok(pipe) => pipe,
            Err(e) => {
                tracing::warn!("Failed to bind {}: {}", path.as_ref().display(), e);
                if let Some(on_error) = &self.on_error {
                    on_error(&e);
                }
                return Err(e);
            }
        };
        let path = pipe.path().to_path_buf();
        tracing::debug!("Listening on {}", path.display());

        let shutdown = Shutdown::new();
        let terminated = Shutdown::new();

        tokio::spawn(accept_loop(
            pipe,
            self,
            shutdown.clone(),
            terminated.clone(),
        ));

        Ok(RpcListener {
            path,
            shutdown,
            terminated,
        })
    }
}

/// A running listener.
///
/// Dropping the handle does not stop the listener; call
/// [`close`](Self::close).
pub struct RpcListener {
    path: PathBuf,
    shutdown: Shutdown,
    terminated: Shutdown,
}

impl RpcListener {
    /// Create a new listener builder.
    pub fn builder() -> ListenerBuilder {
        ListenerBuilder::new()
    }

    /// Socket path the listener is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting and remove the socket file. Idempotent.
    pub fn close(&self) {
        if self.shutdown.trigger() {
            tracing::debug!("Closing listener on {}", self.path.display());
        }
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Wait until the accept loop has stopped and the socket file is gone.
    pub async fn wait_for_shutdown(&self) {
        self.terminated.wait().await;
    }
}

async fn accept_loop(
    pipe: PipeListener,
    builder: ListenerBuilder,
    shutdown: Shutdown,
    terminated: Shutdown,
) {
    let ListenerBuilder {
        config,
        handler,
        on_connection,
        on_error,
        on_close,
    } = builder;

    let report = |err: &RpcError| {
        if let Some(on_error) = &on_error {
            on_error(err);
        }
    };

    loop {
        let accepted = tokio::select! {
            accepted = pipe.accept() => accepted,
            _ = shutdown.wait() => break,
        };

        let stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                report(&e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let (channel, reader_task) = match RpcChannel::prepare_unix(stream, config.clone()) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!("Failed to set up accepted channel: {}", e);
                report(&e);
                continue;
            }
        };

        if let Some(handler) = &handler {
            channel.set_shared_handler(handler.clone());
        }
        if let Some(on_connection) = &on_connection {
            on_connection(channel);
        }
        tokio::spawn(reader_task);
    }

    // Unlinks the socket file
    drop(pipe);

    if let Some(on_close) = &on_close {
        on_close();
    }
    terminated.trigger();
}
