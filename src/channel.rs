//! Bidirectional RPC channel over one byte stream.
//!
//! An [`RpcChannel`] runs two background tasks per connection:
//! 1. Read loop: socket chunks → [`FrameBuffer`] → envelopes → dispatch
//! 2. Writer task: encoded frames → batched vectored writes
//!
//! Each inbound envelope is either the response to one of our pending calls
//! or a request for the installed handler. Handlers run on their own tasks,
//! so a slow or panicking handler never stalls the read loop.
//!
//! # Example
//!
//! ```no_run
//! use udsocket_rpc::{ChannelConfig, RpcChannel};
//! use serde_json::json;
//!
//! # async fn run() -> udsocket_rpc::Result<()> {
//! let channel = RpcChannel::connect("/tmp/app.sock", ChannelConfig::default()).await?;
//! channel.set_handler(|data| async move { Ok(json!({ "echo": data })) });
//!
//! let answer = channel.call(&json!({ "op": "ping" })).await?;
//! println!("{}", answer);
//! channel.close();
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Semaphore;
use tokio::task::JoinError;

use crate::codec::{JsonCodec, Serializer};
use crate::config::ChannelConfig;
use crate::error::{RemoteError, Result, RpcError};
use crate::handler::{
    panic_message, BoxFuture, FnHandler, Handler, HandlerError, HandlerResult, HandlerSlot,
    SyncHandler, TypedHandler, BUSY_CODE, CANCELED_CODE, PANIC_CODE, TOO_LARGE_CODE,
};
use crate::pending::PendingCalls;
use crate::protocol::{Envelope, FrameBuffer, FrameEncoder};
use crate::shutdown::Shutdown;
use crate::writer::{spawn_writer_task, WriterHandle};

/// Process-wide channel number, part of every call id.
static NEXT_CHANNEL: AtomicU64 = AtomicU64::new(1);

/// Random value fixed for the lifetime of the process.
fn process_seed() -> u64 {
    static SEED: OnceLock<u64> = OnceLock::new();
    *SEED.get_or_init(|| {
        use std::time::{SystemTime, UNIX_EPOCH};

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let pid = std::process::id() as u64;

        // RandomState carries per-process random keys
        let mut hasher = std::collections::hash_map::RandomState::new().build_hasher();
        hasher.write_u64(nanos.wrapping_mul(0x517cc1b727220a95) ^ pid);
        hasher.finish()
    })
}

/// Call id generator for one channel.
///
/// Ids look like `{seed:016x}-{channel:x}-{counter}`. The prefix is unique
/// per channel, so a channel can tell its own ids apart from the peer's.
pub(crate) struct CallIds {
    prefix: String,
    counter: AtomicU64,
}

impl CallIds {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(process_seed);
        let channel = NEXT_CHANNEL.fetch_add(1, Ordering::Relaxed);
        Self {
            prefix: format!("{:016x}-{:x}-", seed, channel),
            counter: AtomicU64::new(0),
        }
    }

    pub(crate) fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{}", self.prefix, n)
    }

    /// True for ids this generator produced (or would produce).
    pub(crate) fn is_own(&self, id: &str) -> bool {
        id.starts_with(&self.prefix)
    }
}

/// State shared by channel handles, the read loop and handler tasks.
struct ChannelInner {
    pending: PendingCalls,
    handler: HandlerSlot,
    writer: WriterHandle,
    encoder: Mutex<FrameEncoder>,
    serializer: Serializer,
    ids: CallIds,
    timeout: Duration,
    handler_limit: Option<Arc<Semaphore>>,
    /// Latched when the channel starts closing.
    shutdown: Shutdown,
    /// Latched once the read loop has finished cleaning up.
    terminated: Shutdown,
}

/// A connected RPC endpoint.
///
/// Cheap to clone; all clones drive the same connection. The background
/// tasks keep the connection open until the peer disconnects or
/// [`close`](Self::close) is called, even after every handle is dropped.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<ChannelInner>,
}

impl RpcChannel {
    /// Wrap any bidirectional byte stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_stream<S>(stream: S, config: ChannelConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::start(reader, writer, config)
    }

    /// Wrap a connected Unix socket.
    #[cfg(unix)]
    pub fn from_unix(stream: tokio::net::UnixStream, config: ChannelConfig) -> Result<Self> {
        let (reader, writer) = stream.into_split();
        Self::start(reader, writer, config)
    }

    /// Like [`from_unix`](Self::from_unix), but the read loop is returned
    /// instead of spawned, so the caller can finish setting the channel up
    /// before any inbound frame is dispatched.
    #[cfg(unix)]
    pub(crate) fn prepare_unix(
        stream: tokio::net::UnixStream,
        config: ChannelConfig,
    ) -> Result<(Self, BoxFuture<'static, ()>)> {
        let (reader, writer) = stream.into_split();
        Self::prepare(reader, writer, config)
    }

    /// Connect to a listening Unix socket.
    #[cfg(unix)]
    pub async fn connect(
        path: impl AsRef<std::path::Path>,
        config: ChannelConfig,
    ) -> Result<Self> {
        config.validate()?;
        let stream = tokio::net::UnixStream::connect(path.as_ref()).await?;
        tracing::debug!("Connected to {}", path.as_ref().display());
        Self::from_unix(stream, config)
    }

    fn start<R, W>(reader: R, writer: W, config: ChannelConfig) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (channel, read_loop) = Self::prepare(reader, writer, config)?;
        tokio::spawn(read_loop);
        Ok(channel)
    }

    fn prepare<R, W>(
        reader: R,
        writer: W,
        config: ChannelConfig,
    ) -> Result<(Self, BoxFuture<'static, ()>)>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;

        let shutdown = Shutdown::new();
        let (writer, _writer_task) =
            spawn_writer_task(writer, config.writer.clone(), shutdown.clone());

        let inner = Arc::new(ChannelInner {
            pending: PendingCalls::new(),
            handler: HandlerSlot::new(),
            writer,
            encoder: Mutex::new(config.encoder()),
            serializer: config.serializer.clone(),
            ids: CallIds::new(config.id_seed),
            timeout: config.timeout,
            handler_limit: config
                .max_concurrent_handlers
                .map(|limit| Arc::new(Semaphore::new(limit))),
            shutdown,
            terminated: Shutdown::new(),
        });

        let reader_task: BoxFuture<'static, ()> = Box::pin(read_loop(
            reader,
            config.decoder(),
            config.read_buffer_size,
            inner.clone(),
        ));

        Ok((Self { inner }, reader_task))
    }

    /// Send a request and wait for the peer's response.
    ///
    /// Uses the channel's configured timeout.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Remote`] if the peer's handler failed
    /// - [`RpcError::Timeout`] if no response arrived in time
    /// - [`RpcError::ChannelClosed`] if the channel is or becomes closed
    /// - [`RpcError::PayloadTooLarge`] if the request exceeds the payload limit
    pub async fn call<T: Serialize + ?Sized>(&self, data: &T) -> Result<Value> {
        self.call_with_timeout(data, self.inner.timeout).await
    }

    /// Send a request with an explicit timeout.
    pub async fn call_with_timeout<T: Serialize + ?Sized>(
        &self,
        data: &T,
        timeout: Duration,
    ) -> Result<Value> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(RpcError::ChannelClosed);
        }

        let id = inner.ids.next();
        let envelope = Envelope::request(id.clone(), JsonCodec::to_value(data)?);
        let frame = inner.encode(&envelope)?;

        let waiter = inner.pending.register(id, timeout);
        // Closing after registration is caught here or by fail_all
        if inner.is_closed() {
            return Err(RpcError::ChannelClosed);
        }

        // A stalled writer queue counts against the same deadline
        match tokio::time::timeout_at(waiter.deadline(), inner.writer.send(frame)).await {
            Ok(sent) => sent?,
            Err(_) => tracing::debug!("Call {} never left the writer queue", waiter.id()),
        }
        waiter.wait().await
    }

    /// Send a request and deserialize the response.
    pub async fn call_as<T, R>(&self, data: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        JsonCodec::from_value(self.call(data).await?)
    }

    /// Install an async handler for inbound requests, replacing any other.
    pub fn set_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inner.handler.set(FnHandler::new(handler));
    }

    /// Install a synchronous handler.
    pub fn set_sync_handler<F>(&self, handler: F)
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.handler.set(SyncHandler::new(handler));
    }

    /// Install a handler over typed request and response bodies.
    ///
    /// Requests that fail to deserialize are answered with `EINVAL`.
    pub fn set_typed_handler<F, T, R, E, Fut>(&self, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Into<HandlerError> + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        self.inner.handler.set(TypedHandler::new(handler));
    }

    /// Install a handler shared with other channels.
    pub fn set_shared_handler(&self, handler: Arc<dyn Handler>) {
        self.inner.handler.set_shared(handler);
    }

    /// Remove the handler; inbound requests are dropped afterwards.
    pub fn clear_handler(&self) {
        self.inner.handler.clear();
    }

    /// Close the channel.
    ///
    /// Pending calls fail with [`RpcError::ChannelClosed`] right away, frames
    /// already queued are flushed and the write half is shut down.
    /// Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// True once the channel has started closing.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Resolve once the channel is closed and its pending calls are failed.
    pub async fn closed(&self) {
        self.inner.terminated.wait().await;
    }

    /// Number of calls awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Frames queued for the socket but not yet written.
    pub fn queued_frames(&self) -> usize {
        self.inner.writer.pending_count()
    }
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("id_prefix", &self.inner.ids.prefix)
            .field("pending_calls", &self.inner.pending.len())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

impl ChannelInner {
    fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }

    fn close(&self) {
        if self.shutdown.trigger() {
            let failed = self.pending.fail_all(|| RpcError::ChannelClosed);
            tracing::debug!("Channel closed locally, {} pending calls rejected", failed);
        }
    }

    /// Serialize and frame one envelope.
    fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        let payload = (self.serializer)(envelope)?;
        self.encoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .encode(&payload)
    }

    /// Route one inbound payload.
    fn dispatch(self: &Arc<Self>, payload: Bytes) {
        let envelope = match Envelope::from_slice(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Dropping malformed envelope ({} bytes): {}", payload.len(), e);
                return;
            }
        };

        let key = envelope.key();
        let is_error = envelope.is_error();
        let Envelope { id, data, error } = envelope;

        if let Some(key) = key.as_deref() {
            if self.pending.contains(key) {
                match error {
                    Some(err) => {
                        self.pending
                            .reject(key, RpcError::Remote(RemoteError::from_wire(err)));
                    }
                    None => {
                        self.pending.resolve(key, data);
                    }
                }
                return;
            }

            if self.ids.is_own(key) {
                tracing::debug!("Dropping late response {}", key);
                return;
            }
        }

        // Error envelopes are responses, never requests
        if is_error {
            tracing::debug!("Dropping unmatched error response {:?}", key);
            return;
        }

        let Some(handler) = self.handler.get() else {
            tracing::debug!("No handler installed, dropping envelope {:?}", key);
            return;
        };

        let permit = match &self.handler_limit {
            None => None,
            Some(limit) => match limit.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!("Handler capacity reached, rejecting request {:?}", key);
                    if id.is_some() {
                        let inner = Arc::clone(self);
                        tokio::spawn(async move {
                            let busy = HandlerError::new(BUSY_CODE, "handler capacity reached");
                            inner.respond(id, Err(busy)).await;
                        });
                    }
                    return;
                }
            },
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            // Permit is held until the response is queued
            let _permit = permit;

            let joined = tokio::spawn(async move { handler.call(data).await }).await;
            let outcome = handler_outcome(joined, key.as_deref());

            if id.is_none() {
                if let Err(e) = outcome {
                    tracing::debug!("Notification handler failed: {}", e);
                }
                return;
            }

            inner.respond(id, outcome).await;
        });
    }

    /// Send the response envelope for a handled request.
    async fn respond(&self, id: Option<Value>, outcome: HandlerResult) {
        let envelope = match outcome {
            Ok(data) => Envelope::success(id.clone(), data),
            Err(e) => Envelope::failure(id.clone(), e.to_wire()),
        };

        let frame = match self.encode(&envelope) {
            Ok(frame) => frame,
            Err(RpcError::PayloadTooLarge { size, max }) => {
                tracing::warn!("Response of {} bytes exceeds maximum {}", size, max);
                let too_large = HandlerError::new(
                    TOO_LARGE_CODE,
                    format!("response of {} bytes exceeds maximum {}", size, max),
                );
                match self.encode(&Envelope::failure(id, too_large.to_wire())) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("Failed to encode error response: {}", e);
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!("Failed to encode response: {}", e);
                return;
            }
        };

        if self.writer.send(frame).await.is_err() {
            tracing::debug!("Channel closed before response could be sent");
        }
    }
}

/// Turn a finished handler task into the result sent back to the peer.
fn handler_outcome(
    joined: std::result::Result<HandlerResult, JoinError>,
    key: Option<&str>,
) -> HandlerResult {
    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let message = panic_message(&*e.into_panic());
            tracing::error!("Handler panicked on {:?}: {}", key, message);
            Err(HandlerError::new(PANIC_CODE, message))
        }
        Err(_) => {
            tracing::warn!("Handler task for {:?} was cancelled", key);
            Err(HandlerError::new(CANCELED_CODE, "handler cancelled"))
        }
    }
}

/// Read loop: reads chunks, reassembles frames and dispatches them until
/// EOF, a read error, a fatal framing error or shutdown.
async fn read_loop<R>(
    mut reader: R,
    mut decoder: FrameBuffer,
    read_buffer_size: usize,
    inner: Arc<ChannelInner>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; read_buffer_size];

    let result: Result<()> = loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break Ok(()), // Peer closed
                Ok(n) => n,
                Err(e) => break Err(RpcError::Io(e)),
            },
            _ = inner.shutdown.wait() => break Ok(()),
        };

        if let Err(e) = decoder.decode(&buf[..n], |payload| inner.dispatch(payload)) {
            break Err(e);
        }
    };

    match &result {
        Ok(()) => tracing::debug!("Read loop finished"),
        Err(e) => tracing::error!("Read loop error: {}", e),
    }

    inner.shutdown.trigger();
    let failed = inner.pending.fail_all(|| RpcError::ChannelClosed);
    if failed > 0 {
        tracing::debug!("Rejected {} pending calls on close", failed);
    }
    inner.terminated.trigger();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameCodec;
    use serde_json::json;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    /// Write envelopes to / read envelopes from the raw side of a duplex.
    struct RawPeer {
        stream: DuplexStream,
        codec: FrameCodec,
    }

    impl RawPeer {
        fn new(stream: DuplexStream) -> Self {
            Self {
                stream,
                codec: FrameCodec::new(),
            }
        }

        async fn send(&mut self, value: Value) {
            let frame = self.codec.encode(value.to_string().as_bytes()).unwrap();
            self.stream.write_all(&frame).await.unwrap();
        }

        async fn recv(&mut self) -> Value {
            let mut buf = [0u8; 4096];
            loop {
                let mut out = Vec::new();
                let n = self.stream.read(&mut buf).await.unwrap();
                assert!(n > 0, "unexpected EOF");
                self.codec
                    .decode(&buf[..n], |p| out.push(serde_json::from_slice(&p).unwrap()))
                    .unwrap();
                if let Some(v) = out.into_iter().next() {
                    return v;
                }
            }
        }
    }

    fn pair(config: ChannelConfig) -> (RpcChannel, RawPeer) {
        let (ours, theirs) = duplex(64 * 1024);
        let channel = RpcChannel::from_stream(ours, config).unwrap();
        (channel, RawPeer::new(theirs))
    }

    #[test]
    fn test_call_ids_format() {
        let ids = CallIds::new(Some(0xab));
        let first = ids.next();
        let second = ids.next();

        assert!(first.starts_with("00000000000000ab-"));
        assert!(first.ends_with("-1"));
        assert!(second.ends_with("-2"));
        assert!(ids.is_own(&first));
        assert!(!ids.is_own("00000000000000ab-0-1"));
    }

    #[test]
    fn test_call_ids_unique_per_channel() {
        let a = CallIds::new(Some(1));
        let b = CallIds::new(Some(1));
        assert_ne!(a.next(), b.next());
    }

    #[test]
    fn test_process_seed_is_stable() {
        assert_eq!(process_seed(), process_seed());
    }

    #[tokio::test]
    async fn test_request_envelope_on_wire() {
        let (channel, mut peer) = pair(ChannelConfig::default().id_seed(7));

        let call = tokio::spawn({
            let channel = channel.clone();
            async move { channel.call(&json!({"x": 1})).await }
        });

        let request = peer.recv().await;
        assert_eq!(request["data"], json!({"x": 1}));
        let id = request["id"].as_str().unwrap().to_string();
        assert!(id.starts_with("0000000000000007-"));
        assert!(request.get("error").is_none());

        peer.send(json!({"id": id, "data": {"y": 2}})).await;
        assert_eq!(call.await.unwrap().unwrap(), json!({"y": 2}));
        assert_eq!(channel.pending_calls(), 0);
    }

    #[tokio::test]
    async fn test_null_error_is_success() {
        let (channel, mut peer) = pair(ChannelConfig::default());

        let call = tokio::spawn({
            let channel = channel.clone();
            async move { channel.call(&1).await }
        });

        let id = peer.recv().await["id"].clone();
        peer.send(json!({"id": id, "data": "ok", "error": null})).await;
        assert_eq!(call.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_remote_error_rejects_call() {
        let (channel, mut peer) = pair(ChannelConfig::default());

        let call = tokio::spawn({
            let channel = channel.clone();
            async move { channel.call(&1).await }
        });

        let id = peer.recv().await["id"].clone();
        peer.send(json!({"id": id, "error": {"code": "ENOENT", "message": "gone"}}))
            .await;

        let err = call.await.unwrap().unwrap_err();
        let remote = err.as_remote().unwrap();
        assert!(remote.has_code("ENOENT"));
        assert_eq!(remote.message, "gone");
    }

    #[tokio::test]
    async fn test_handler_response_echoes_numeric_id() {
        let (channel, mut peer) = pair(ChannelConfig::default());
        channel.set_handler(|data| async move { Ok(json!({"got": data})) });

        peer.send(json!({"id": 17, "data": "hi"})).await;
        assert_eq!(peer.recv().await, json!({"id": 17, "data": {"got": "hi"}}));
    }

    #[tokio::test]
    async fn test_own_prefix_is_not_handled() {
        let (channel, mut peer) = pair(ChannelConfig::default());
        channel.set_handler(|data| async move { Ok(data) });

        // Looks like one of our ids but nothing is pending under it
        let stale = format!("{}999", channel.inner.ids.prefix);
        peer.send(json!({"id": stale, "data": 1})).await;
        peer.send(json!({"id": "peer-1", "data": 2})).await;

        assert_eq!(peer.recv().await, json!({"id": "peer-1", "data": 2}));
    }

    #[tokio::test]
    async fn test_malformed_payload_keeps_channel_open() {
        let (channel, mut peer) = pair(ChannelConfig::default());
        channel.set_handler(|data| async move { Ok(data) });

        let frame = peer.codec.encode(b"not json").unwrap();
        peer.stream.write_all(&frame).await.unwrap();
        peer.send(json!([1, 2, 3])).await;
        peer.send(json!({"id": "p-1", "data": "still here"})).await;

        assert_eq!(peer.recv().await, json!({"id": "p-1", "data": "still here"}));
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_oversized_header_closes_channel() {
        let (channel, mut peer) = pair(ChannelConfig::default().max_payload_size(16));

        peer.stream.write_all(&[0, 0, 1, 0]).await.unwrap();
        channel.closed().await;
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_handler_response_too_large() {
        let (channel, mut peer) = pair(ChannelConfig::default().max_payload_size(128));
        channel.set_handler(|_| async move { Ok(json!("x".repeat(1024))) });

        peer.send(json!({"id": "p-1", "data": null})).await;
        let response = peer.recv().await;
        assert_eq!(response["id"], "p-1");
        assert_eq!(response["error"]["code"], TOO_LARGE_CODE);
    }

    #[tokio::test]
    async fn test_busy_when_handler_limit_reached() {
        let (channel, mut peer) = pair(ChannelConfig::default().max_concurrent_handlers(1));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        channel.set_handler(move |data| {
            let release_rx = release_rx.clone();
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(data)
            }
        });

        peer.send(json!({"id": "slow", "data": 1})).await;
        // Let the first handler start and hold the permit
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.send(json!({"id": "rejected", "data": 2})).await;

        let busy = peer.recv().await;
        assert_eq!(busy["id"], "rejected");
        assert_eq!(busy["error"]["code"], BUSY_CODE);

        release_tx.send(()).unwrap();
        assert_eq!(peer.recv().await, json!({"id": "slow", "data": 1}));
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let (channel, mut peer) = pair(ChannelConfig::default());
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        channel.set_sync_handler(move |data| {
            let _ = seen_tx.send(data.clone());
            Ok(data)
        });

        peer.send(json!({"data": "note"})).await;
        peer.send(json!({"id": "p-1", "data": "req"})).await;

        assert_eq!(seen_rx.recv().await.unwrap(), json!("note"));
        // The only frame on the wire is the response to the request
        assert_eq!(peer.recv().await, json!({"id": "p-1", "data": "req"}));
    }

    #[tokio::test]
    async fn test_close_rejects_pending_and_later_calls() {
        let (channel, _peer) = pair(ChannelConfig::default());

        let call = tokio::spawn({
            let channel = channel.clone();
            async move { channel.call(&1).await }
        });
        while channel.pending_calls() == 0 {
            tokio::task::yield_now().await;
        }

        channel.close();
        assert!(matches!(call.await.unwrap(), Err(RpcError::ChannelClosed)));
        assert!(matches!(channel.call(&2).await, Err(RpcError::ChannelClosed)));
        assert_eq!(channel.pending_calls(), 0);
        channel.closed().await;
    }

    #[tokio::test]
    async fn test_request_too_large_is_not_registered() {
        let (channel, mut peer) = pair(ChannelConfig::default().max_payload_size(32));

        let err = channel.call(&"y".repeat(100)).await.unwrap_err();
        assert!(matches!(err, RpcError::PayloadTooLarge { .. }));
        assert_eq!(channel.pending_calls(), 0);
        assert!(!channel.is_closed());

        // Nothing reached the wire
        let mut buf = [0u8; 64];
        let read = tokio::time::timeout(Duration::from_millis(50), peer.stream.read(&mut buf));
        assert!(read.await.is_err());
    }

    #[tokio::test]
    async fn test_unmatched_error_envelope_is_dropped() {
        let (channel, mut peer) = pair(ChannelConfig::default());
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        channel.set_sync_handler(move |data| {
            let _ = seen_tx.send(data.clone());
            Ok(data)
        });

        peer.send(json!({"id": "other-1", "error": "x"})).await;
        peer.send(json!({"id": "p-1", "data": 1})).await;

        assert_eq!(peer.recv().await, json!({"id": "p-1", "data": 1}));
        // Only the request reached the handler
        assert_eq!(seen_rx.recv().await.unwrap(), json!(1));
        assert!(seen_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_handler_task_reports_code() {
        let task = tokio::spawn(std::future::pending::<HandlerResult>());
        task.abort();

        let err = handler_outcome(task.await, Some("p-1")).unwrap_err();
        assert_eq!(
            err.to_wire(),
            json!({"code": CANCELED_CODE, "message": "handler cancelled"})
        );
    }
}
