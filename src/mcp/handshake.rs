//! Session Handshake
//!
//! Two-step protocol bring-up required once per announced session before the
//! server accepts tool calls:
//!
//! 1. POST `initialize` (protocol version, capabilities, client info) and
//!    require a 2xx status
//! 2. POST `notifications/initialized` and require a 2xx status; the body is
//!    not inspected
//!
//! [`HandshakeGate`] coalesces concurrent triggers so at most one handshake is
//! in flight, and a session that already completed one is not initialised again.

use crate::mcp::error::CallError;
use crate::mcp::protocol::{InitializeParams, McpRequest};
use crate::mcp::transport::CallPoster;
use crate::metrics;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Identity of one announced session within one stream lifetime
///
/// The stream generation is part of the key so a server that reuses a session
/// id on a fresh stream still gets a fresh handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey {
    pub generation: u64,
    pub session_id: String,
}

/// Performs the initialize/initialized exchange
pub struct Handshake {
    poster: Arc<dyn CallPoster>,
    params: InitializeParams,
}

impl Handshake {
    pub fn new(poster: Arc<dyn CallPoster>, params: InitializeParams) -> Self {
        Self { poster, params }
    }

    /// Run both steps against `url`
    ///
    /// # Errors
    ///
    /// Returns [`CallError::HandshakeFailed`] on any transport failure or
    /// non-2xx status. The handshake is never retried here.
    pub async fn perform(&self, url: &str) -> Result<(), CallError> {
        let initialize = McpRequest::initialize(&self.params);
        tracing::debug!("Sending initialize to {}", url);

        let reply = self
            .poster
            .post(url, &initialize)
            .await
            .map_err(|e| CallError::HandshakeFailed(format!("initialize request failed: {:#}", e)))?;
        if !reply.is_success() {
            return Err(CallError::HandshakeFailed(format!(
                "initialize returned {}: {}",
                reply.status, reply.body
            )));
        }

        let reply = self
            .poster
            .post(url, &McpRequest::initialized())
            .await
            .map_err(|e| {
                CallError::HandshakeFailed(format!("initialized notification failed: {:#}", e))
            })?;
        if !reply.is_success() {
            return Err(CallError::HandshakeFailed(format!(
                "initialized returned {}: {}",
                reply.status, reply.body
            )));
        }

        Ok(())
    }
}

/// Serialises handshakes and remembers which session is initialised
pub struct HandshakeGate {
    handshake: Handshake,
    completed: Mutex<Option<SessionKey>>,
}

impl HandshakeGate {
    pub fn new(handshake: Handshake) -> Self {
        Self {
            handshake,
            completed: Mutex::new(None),
        }
    }

    /// Make sure `key` has completed a handshake
    ///
    /// Returns `Ok(true)` if this call ran the handshake, `Ok(false)` if the
    /// session was already initialised (possibly by a concurrent trigger that
    /// held the gate while this one waited).
    pub async fn ensure(&self, key: &SessionKey, url: &str) -> Result<bool, CallError> {
        let mut completed = self.completed.lock().await;
        if completed.as_ref() == Some(key) {
            return Ok(false);
        }

        tracing::info!("Initializing session {}", key.session_id);
        match self.handshake.perform(url).await {
            Ok(()) => {
                tracing::info!("Session {} initialized", key.session_id);
                metrics::HANDSHAKES_TOTAL.with_label_values(&["success"]).inc();
                *completed = Some(key.clone());
                Ok(true)
            }
            Err(e) => {
                tracing::error!("Handshake for session {} failed: {}", key.session_id, e);
                metrics::HANDSHAKES_TOTAL.with_label_values(&["failure"]).inc();
                Err(e)
            }
        }
    }
}
