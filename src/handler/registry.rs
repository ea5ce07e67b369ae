//! Request handlers and the per-channel handler slot.
//!
//! A channel holds at most one handler. Installing a new one replaces the
//! previous; requests already dispatched keep running on the old one.
//!
//! # Example
//!
//! ```
//! use udsocket_rpc::handler::{Handler, HandlerSlot, FnHandler};
//! use serde_json::{json, Value};
//!
//! let slot = HandlerSlot::new();
//! assert!(slot.get().is_none());
//!
//! slot.set(FnHandler::new(|data: Value| async move { Ok(data) }));
//! assert!(slot.get().is_some());
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::outcome::{HandlerError, HandlerResult, INVALID_INPUT_CODE};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for request handlers.
pub trait Handler: Send + Sync + 'static {
    /// Handle the `data` field of an inbound request.
    fn call(&self, data: Value) -> BoxFuture<'static, HandlerResult>;
}

/// Asynchronous closure handler over raw JSON values.
pub struct FnHandler<F> {
    handler: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Wrap an async closure.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, data: Value) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(data))
    }
}

/// Synchronous closure handler; runs on the handler task.
pub struct SyncHandler<F> {
    handler: Arc<F>,
}

impl<F> SyncHandler<F>
where
    F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
{
    /// Wrap a blocking-free synchronous closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl<F> Handler for SyncHandler<F>
where
    F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
{
    fn call(&self, data: Value) -> BoxFuture<'static, HandlerResult> {
        let handler = self.handler.clone();
        Box::pin(async move { handler(data) })
    }
}

/// Wrapper that deserializes the request and serializes the response.
pub struct TypedHandler<F, T, R, E, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> (Fut, R, E)>,
}

impl<F, T, R, E, Fut> TypedHandler<F, T, R, E, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R, E, Fut> Handler for TypedHandler<F, T, R, E, Fut>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    E: Into<HandlerError> + Send + 'static,
    Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
{
    fn call(&self, data: Value) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_value(data) {
            Ok(v) => v,
            Err(e) => {
                let err = HandlerError::new(INVALID_INPUT_CODE, format!("invalid request: {}", e));
                return Box::pin(async move { Err(err) });
            }
        };

        let fut = (self.handler)(parsed);
        Box::pin(async move {
            match fut.await {
                Ok(response) => serde_json::to_value(response).map_err(HandlerError::from),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// The single handler slot of a channel.
#[derive(Default)]
pub struct HandlerSlot {
    handler: RwLock<Option<Arc<dyn Handler>>>,
}

impl HandlerSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a handler, replacing any previous one.
    pub fn set<H: Handler>(&self, handler: H) {
        self.set_shared(Arc::new(handler));
    }

    /// Install an already shared handler.
    pub fn set_shared(&self, handler: Arc<dyn Handler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Remove the handler; later requests are dropped.
    pub fn clear(&self) -> Option<Arc<dyn Handler>> {
        self.handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Current handler, if any.
    pub fn get(&self) -> Option<Arc<dyn Handler>> {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
