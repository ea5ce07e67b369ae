//! Pending-call table.
//!
//! Each outgoing call registers its id together with a oneshot sender.
//! The entry leaves the table exactly once: by a matching response, by its
//! deadline, by channel closure, or by the caller dropping the wait. All
//! paths go through `HashMap::remove` under one lock, so whichever event
//! comes first wins and the rest find nothing to do.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, RpcError};

/// Completion channel back to the waiting caller.
type PendingCall = oneshot::Sender<Result<Value>>;

/// Map from call id to in-flight call.
///
/// Bounded only by the number of concurrently outstanding calls.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a call and arm its deadline.
    ///
    /// The returned waiter must be awaited (or dropped) by the caller.
    pub fn register(&self, id: impl Into<String>, timeout: Duration) -> PendingResponse<'_> {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let deadline = Instant::now() + timeout;

        self.lock().insert(id.clone(), tx);

        PendingResponse {
            table: self,
            id,
            rx,
            timeout,
            deadline,
        }
    }

    /// Complete a call with the peer's data.
    ///
    /// Returns `false` if no call with this id is pending.
    pub fn resolve(&self, id: &str, data: Value) -> bool {
        self.complete(id, Ok(data))
    }

    /// Fail a call.
    ///
    /// Returns `false` if no call with this id is pending.
    pub fn reject(&self, id: &str, err: RpcError) -> bool {
        self.complete(id, Err(err))
    }

    fn complete(&self, id: &str, outcome: Result<Value>) -> bool {
        match self.lock().remove(id) {
            Some(tx) => {
                // Receiver gone means the caller already stopped waiting
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Remove an entry without completing it.
    fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Fail every pending call, e.g. when the channel closes.
    ///
    /// Returns the number of calls failed.
    pub fn fail_all<F>(&self, make_err: F) -> usize
    where
        F: Fn() -> RpcError,
    {
        let drained: Vec<PendingCall> = self.lock().drain().map(|(_, call)| call).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(make_err()));
        }
        count
    }

    /// Check whether a call is pending.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of in-flight calls.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no calls are in flight.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Waiter for one registered call.
///
/// Dropping it before completion removes the call from the table.
#[must_use = "a pending call is only observed by awaiting `wait`"]
pub struct PendingResponse<'a> {
    table: &'a PendingCalls,
    id: String,
    rx: oneshot::Receiver<Result<Value>>,
    timeout: Duration,
    deadline: Instant,
}

impl PendingResponse<'_> {
    /// Id this waiter is registered under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When this call times out.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the response, the deadline, or channel closure.
    pub async fn wait(mut self) -> Result<Value> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Err(_) => {
                if self.table.remove(&self.id) {
                    tracing::warn!(
                        "Call {} timed out after {}ms",
                        self.id,
                        self.timeout.as_millis()
                    );
                    return Err(RpcError::Timeout {
                        id: self.id.clone(),
                        timeout: self.timeout,
                    });
                }

                // Completed between the deadline firing and the removal
                match self.rx.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RpcError::ChannelClosed),
                }
            }
        }
    }
}

impl Drop for PendingResponse<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
