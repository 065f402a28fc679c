//! Pending-Call Registry
//!
//! Correlates each outbound tool call with its asynchronous result. Every entry
//! is completed exactly once, by whichever comes first of:
//!
//! - [`PendingCalls::settle`] (a stream frame or an immediate POST body)
//! - its own timeout timer
//! - [`PendingCalls::cancel`] / dropping the [`CallAwaiter`]
//!
//! Completion always starts by removing the entry from the map under the lock,
//! so the loser of a race simply finds nothing to complete.

use crate::mcp::envelope::ResponseEnvelope;
use crate::mcp::error::CallError;
use crate::metrics;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Default budget for a tool call; downstream lookups can be slow
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// One in-flight call
#[derive(Debug)]
pub struct PendingCall {
    /// Request id
    pub id: u64,

    /// When the call was registered
    pub created_at: DateTime<Utc>,

    /// Session the call was issued on
    session_id: Option<String>,

    result_tx: oneshot::Sender<ResponseEnvelope>,

    timer: JoinHandle<()>,
}

type CallMap = HashMap<String, PendingCall>;

/// Concurrent map from request id to in-flight awaiter
#[derive(Debug, Clone)]
pub struct PendingCalls {
    calls: Arc<Mutex<CallMap>>,
    timeout: Duration,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl PendingCalls {
    /// Create a registry whose calls expire after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register call `id` and start its timer
    ///
    /// Must be called from within a Tokio runtime. Registering an id that is
    /// still pending replaces (and cancels) the previous entry; the client
    /// never does this since ids are monotonic.
    pub fn register(&self, id: u64, session_id: Option<String>) -> CallAwaiter {
        let key = id.to_string();
        let (result_tx, result_rx) = oneshot::channel();

        // The timer is spawned under the lock, so its expiry always finds the entry
        let mut calls = self.lock();
        let timer = {
            let registry = self.clone();
            let key = key.clone();
            let after = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                registry.expire(&key, after);
            })
        };

        let call = PendingCall {
            id,
            created_at: Utc::now(),
            session_id,
            result_tx,
            timer,
        };

        if let Some(previous) = calls.insert(key.clone(), call) {
            tracing::warn!("Request id {} registered twice, dropping older awaiter", key);
            previous.timer.abort();
        }
        metrics::PENDING_CALLS.set(calls.len() as i64);
        drop(calls);

        CallAwaiter {
            id: key,
            result_rx,
            registry: self.clone(),
        }
    }

    /// Move `id` to another session (after a retry on a fresh stream)
    ///
    /// Returns `false` when the id is no longer pending.
    pub fn rebind(&self, id: &str, session_id: &str) -> bool {
        match self.lock().get_mut(id) {
            Some(call) => {
                call.session_id = Some(session_id.to_string());
                true
            }
            None => false,
        }
    }

    /// Deliver the result for `id`
    ///
    /// Returns `false` when the id is unknown (already settled, expired or
    /// never registered). That is not an error: the frame is simply unmatched.
    pub fn settle(&self, id: &str, envelope: ResponseEnvelope) -> bool {
        let Some(call) = self.take(id) else {
            tracing::warn!("No pending request for id {}, dropping response", id);
            metrics::UNMATCHED_RESPONSES_TOTAL.inc();
            return false;
        };

        call.timer.abort();
        let envelope = envelope
            .with_session(call.session_id.as_deref())
            .with_request_id(id);
        tracing::debug!(
            "Settled request {} after {}ms (success: {})",
            id,
            (Utc::now() - call.created_at).num_milliseconds(),
            envelope.success
        );
        // Receiver may already be gone if the caller was cancelled
        let _ = call.result_tx.send(envelope);
        true
    }

    /// Settle `id` with a failure
    pub fn fail(&self, id: &str, error: &CallError) -> bool {
        self.settle(id, ResponseEnvelope::failure(error))
    }

    /// Remove `id` without delivering anything
    pub fn cancel(&self, id: &str) -> bool {
        match self.take(id) {
            Some(call) => {
                call.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Fail every pending call (used on shutdown)
    pub fn fail_all(&self, error: &CallError) {
        let drained: Vec<(String, PendingCall)> = self.lock().drain().collect();
        metrics::PENDING_CALLS.set(0);
        for (id, call) in drained {
            call.timer.abort();
            let envelope = ResponseEnvelope::failure(error)
                .with_session(call.session_id.as_deref())
                .with_request_id(id);
            let _ = call.result_tx.send(envelope);
        }
    }

    /// Whether `id` is still waiting
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of calls in flight
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expire(&self, id: &str, after: Duration) {
        let Some(call) = self.take(id) else {
            return;
        };
        let error = CallError::Timeout {
            id: id.to_string(),
            after,
        };
        tracing::error!("{}", error);
        let envelope = ResponseEnvelope::failure(&error)
            .with_session(call.session_id.as_deref())
            .with_request_id(id);
        let _ = call.result_tx.send(envelope);
    }

    fn take(&self, id: &str) -> Option<PendingCall> {
        let mut calls = self.lock();
        let call = calls.remove(id);
        metrics::PENDING_CALLS.set(calls.len() as i64);
        call
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CallMap> {
        // A panic while holding the lock cannot leave the map half-updated
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Receiving half of a registered call
///
/// Dropping the awaiter before it resolves cancels the call, so an abandoned
/// caller never leaves a stuck entry behind.
#[derive(Debug)]
pub struct CallAwaiter {
    id: String,
    result_rx: oneshot::Receiver<ResponseEnvelope>,
    registry: PendingCalls,
}

impl CallAwaiter {
    /// Request id as used for correlation
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for settlement, timeout or cancellation
    pub async fn wait(mut self) -> ResponseEnvelope {
        match (&mut self.result_rx).await {
            Ok(envelope) => envelope,
            Err(_) => ResponseEnvelope::failure(&CallError::Shutdown).with_request_id(self.id.clone()),
        }
    }
}

impl Drop for CallAwaiter {
    fn drop(&mut self) {
        self.registry.cancel(&self.id);
    }
}
