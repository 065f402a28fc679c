//! BioMCP Client Layer
//!
//! The public call surface over the event-stream transport. A
//! [`BioMcpClient`] is a cheap, cloneable handle: every clone shares the same
//! stream supervisor, session, handshake gate and pending-call registry.
//!
//! # Call path
//!
//! 1. Pass the call gate: wait (bounded) until the connection is
//!    `Initialized`, kicking a reconnect or running the handshake as needed,
//!    then allocate the id and register the call. Readiness and id allocation
//!    happen under one lock, so a call can never be issued against a session
//!    that rotated between the check and the POST.
//! 2. POST `tools/call` to the session's callback endpoint.
//! 3. Interpret the synchronous reply (accepted for stream delivery, immediate
//!    result, session expiry, plain HTTP failure) and await the registry.
//!
//! Failures never escape [`BioMcpClient::call`]; they are returned as a
//! [`ResponseEnvelope`] with `success == false`.
//!
//! # Usage
//!
//! ```ignore
//! use biomcp_client::mcp::{BioMcpClient, ClientSettings};
//!
//! let client = BioMcpClient::connect(ClientSettings::new("http://localhost:8000"))?;
//! let envelope = client.call("search", json!({"query": "BRCA1"})).await;
//! ```

use crate::mcp::connection::{
    Command, ConnectionState, ConnectionStatus, Link, StreamSupervisor,
};
use crate::mcp::envelope::ResponseEnvelope;
use crate::mcp::error::CallError;
use crate::mcp::handshake::{Handshake, HandshakeGate};
use crate::mcp::http_transport::HttpTransport;
use crate::mcp::pending::{CallAwaiter, PendingCalls, DEFAULT_CALL_TIMEOUT};
use crate::mcp::protocol::{
    request_id_key, ClientInfo, InitializeParams, McpError, McpRequest, DEFAULT_PROTOCOL_VERSION,
};
use crate::mcp::reconnect::{is_session_expired, ReconnectPolicy};
use crate::mcp::stream::SessionDescriptor;
use crate::mcp::transport::{CallPoster, EventSource, PostReply};
use crate::metrics;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};

/// Default stream path appended to the base URL
pub const DEFAULT_STREAM_PATH: &str = "/sse";

/// Default bound on waiting for the `Initialized` state
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single POST
pub const DEFAULT_POST_TIMEOUT: Duration = Duration::from_secs(30);

/// Queue depth for supervisor commands
const COMMAND_BUFFER: usize = 16;

/// Marker in a 2xx body acknowledging stream delivery
const ACCEPTED_MARKER: &str = "Accepted";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Tool server base URL (no trailing slash)
    pub base_url: String,

    /// Event stream path, joined to `base_url`
    pub stream_path: String,

    /// Per-call budget enforced by the pending-call registry
    pub call_timeout: Duration,

    /// Timeout for each POST
    pub post_timeout: Duration,

    /// Bound on waiting for the connection to become `Initialized`
    pub ready_timeout: Duration,

    pub reconnect_base_delay: Duration,

    pub max_reconnect_attempts: u32,

    /// Parameters sent with `initialize`
    pub initialize: InitializeParams,
}

impl ClientSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        let defaults = ReconnectPolicy::default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            post_timeout: DEFAULT_POST_TIMEOUT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            reconnect_base_delay: defaults.base_delay(),
            max_reconnect_attempts: defaults.max_attempts(),
            initialize: InitializeParams::new(
                DEFAULT_PROTOCOL_VERSION,
                ClientInfo {
                    name: "biomcp-client".to_string(),
                    version: "1.0.0".to_string(),
                },
            ),
        }
    }

    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_post_timeout(mut self, timeout: Duration) -> Self {
        self.post_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, base_delay: Duration, max_attempts: u32) -> Self {
        self.reconnect_base_delay = base_delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Full event stream URL
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, self.stream_path)
    }
}

/// Anything that can run a tool call and hand back an envelope
///
/// The seam between the domain operations and the transport-backed client.
#[async_trait]
pub trait ToolCaller: Send + Sync {
    async fn call(&self, tool_name: &str, params: Value) -> ResponseEnvelope;

    /// Issue a call whose result is not needed
    ///
    /// Returns once the call has been handed to the server, so a call made
    /// afterwards is sent behind it. The default runs the whole call.
    async fn submit(&self, tool_name: &str, params: Value) {
        let _ = self.call(tool_name, params).await;
    }
}

/// A call that passed the gate: id allocated, awaiter registered
struct Admission {
    id: u64,
    generation: u64,
    session: SessionDescriptor,
    awaiter: CallAwaiter,
}

/// An admitted call after its first POST
struct Posted {
    admission: Admission,
    request: McpRequest,
    reply: anyhow::Result<PostReply>,
}

/// Shared client for the remote biomedical tool server
#[derive(Clone)]
pub struct BioMcpClient {
    link: Arc<Link>,
    commands: mpsc::Sender<Command>,
}

impl std::fmt::Debug for BioMcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BioMcpClient")
            .field("stream_url", &self.link.stream_url)
            .field("status", &self.link.snapshot())
            .finish()
    }
}

impl BioMcpClient {
    /// Create a client backed by [`HttpTransport`] and start the stream
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn connect(settings: ClientSettings) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new()?.with_post_timeout(settings.post_timeout));
        Ok(Self::with_transport(settings, transport.clone(), transport))
    }

    /// Create a client over explicit transports and start the stream
    ///
    /// Must be called from within a Tokio runtime. The stream supervisor runs
    /// until [`shutdown`](Self::shutdown) or until the last handle is dropped.
    pub fn with_transport(
        settings: ClientSettings,
        source: Arc<dyn EventSource>,
        poster: Arc<dyn CallPoster>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let link = Arc::new(Link {
            status,
            policy: Mutex::new(ReconnectPolicy::new(
                settings.reconnect_base_delay,
                settings.max_reconnect_attempts,
            )),
            registry: PendingCalls::new(settings.call_timeout),
            handshake: HandshakeGate::new(Handshake::new(
                poster.clone(),
                settings.initialize.clone(),
            )),
            poster,
            stream_url: settings.stream_url(),
            base_url: settings.base_url,
            ready_timeout: settings.ready_timeout,
            call_gate: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        });

        tracing::info!("Starting BioMCP client for {}", link.stream_url);
        tokio::spawn(StreamSupervisor::new(link.clone(), source, command_rx).run());

        Self { link, commands }
    }

    /// Invoke `tool_name` and wait for its result
    ///
    /// Never fails: every error is folded into the returned envelope.
    pub async fn call(&self, tool_name: &str, params: Value) -> ResponseEnvelope {
        let started = Instant::now();
        let envelope = match self.post_call(tool_name, params).await {
            Ok(posted) => self.complete(posted).await,
            Err(e) => ResponseEnvelope::failure(&e),
        };
        record_outcome(tool_name, started, &envelope);
        envelope
    }

    /// Post `tool_name` and finish it in the background
    ///
    /// On an initialized connection this returns after the POST, so the call
    /// is ordered ahead of anything issued afterwards. Otherwise the whole call
    /// runs in the background and the caller is not held up by the readiness
    /// wait. The outcome is only logged.
    pub async fn submit(&self, tool_name: &str, params: Value) {
        let started = Instant::now();
        let client = self.clone();
        let tool_name = tool_name.to_string();

        if !self.state().is_initialized() {
            tokio::spawn(async move {
                let envelope = client.call(&tool_name, params).await;
                tracing::debug!(
                    "Background call {} finished (success: {})",
                    tool_name,
                    envelope.success
                );
            });
            return;
        }

        let posted = match self.post_call(&tool_name, params).await {
            Ok(posted) => posted,
            Err(e) => {
                record_outcome(&tool_name, started, &ResponseEnvelope::failure(&e));
                return;
            }
        };
        tokio::spawn(async move {
            let envelope = client.complete(posted).await;
            record_outcome(&tool_name, started, &envelope);
        });
    }

    /// Raw request surface; same semantics as [`call`](Self::call)
    pub async fn send_request(&self, method: &str, params: Value) -> ResponseEnvelope {
        self.call(method, params).await
    }

    /// Latest published connection status
    pub fn status(&self) -> ConnectionStatus {
        self.link.snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        self.link.snapshot().state
    }

    /// Number of calls awaiting a result
    pub fn pending_calls(&self) -> usize {
        self.link.registry.len()
    }

    /// Wait (bounded) until the connection is initialised
    ///
    /// # Errors
    ///
    /// Returns the same errors a call would report before its POST
    pub async fn wait_until_ready(&self) -> Result<SessionDescriptor, CallError> {
        let _gate = self.link.call_gate.lock().await;
        self.ensure_ready_locked().await.map(|(_, session)| session)
    }

    /// Stop the stream supervisor and fail every in-flight call
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down BioMCP client");
        let _ = self.commands.send(Command::Shutdown).await;
        self.link.registry.fail_all(&CallError::Shutdown);
    }

    /// Admit a call and send its first POST
    async fn post_call(&self, tool_name: &str, params: Value) -> Result<Posted, CallError> {
        let admission = self.admit().await?;

        let request = McpRequest::tool_call(admission.id, tool_name, params);
        let url = admission.session.callback_url(&self.link.base_url);
        tracing::debug!("Calling tool {} (request {})", tool_name, admission.id);

        let reply = self.link.poster.post(&url, &request).await;
        Ok(Posted {
            admission,
            request,
            reply,
        })
    }

    /// Interpret the first POST's reply and wait for the result
    async fn complete(&self, posted: Posted) -> ResponseEnvelope {
        let Posted {
            admission,
            request,
            reply,
        } = posted;

        match reply {
            Ok(reply) if reply.is_success() => self.settle_reply(admission, reply).await,
            Ok(reply) if is_session_expired(reply.status, &reply.body) => {
                tracing::warn!(
                    "Session {} expired (HTTP {}), reconnecting",
                    admission.session.session_id,
                    reply.status
                );
                self.retry_after_recycle(admission, &request).await
            }
            Ok(reply) => {
                let error = CallError::Transport {
                    status: reply.status,
                    body: reply.body,
                };
                self.link.registry.fail(admission.awaiter.id(), &error);
                admission.awaiter.wait().await
            }
            Err(e) => {
                // The server may have received the call before the client-side
                // failure; its result can still arrive on the stream
                tracing::warn!(
                    "POST for request {} failed ({:#}), waiting for stream delivery",
                    admission.id,
                    e
                );
                admission.awaiter.wait().await
            }
        }
    }

    /// Pass the call gate and register a new call
    async fn admit(&self) -> Result<Admission, CallError> {
        let _gate = self.link.call_gate.lock().await;
        let (generation, session) = self.ensure_ready_locked().await?;

        let id = self.link.next_id.fetch_add(1, Ordering::SeqCst);
        let awaiter = self
            .link
            .registry
            .register(id, Some(session.session_id.clone()));

        Ok(Admission {
            id,
            generation,
            session,
            awaiter,
        })
    }

    /// Bring the connection to `Initialized`; caller holds the call gate
    async fn ensure_ready_locked(&self) -> Result<(u64, SessionDescriptor), CallError> {
        let deadline = tokio::time::Instant::now() + self.link.ready_timeout;
        let mut status_rx = self.link.status.subscribe();
        let mut kicked = false;
        let mut restarted = false;

        loop {
            let status = status_rx.borrow_and_update().clone();
            match &status.state {
                ConnectionState::Initialized(session) => {
                    return Ok((status.generation, session.clone()));
                }
                ConnectionState::SessionReady(session) => {
                    self.link.initialize(status.generation, session).await?;
                    continue;
                }
                ConnectionState::Disconnected if status.exhausted => {
                    if restarted {
                        return Err(CallError::NotConnected(
                            "reconnect attempts exhausted".to_string(),
                        ));
                    }
                    restarted = true;
                    self.request_reconnect()?;
                }
                ConnectionState::Disconnected if !kicked => {
                    kicked = true;
                    self.request_reconnect()?;
                }
                _ => {}
            }

            match tokio::time::timeout_at(deadline, status_rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(CallError::Shutdown),
                Err(_) => {
                    let state = self.link.snapshot().state;
                    return Err(CallError::NotConnected(format!(
                        "tool server not ready after {}s (state: {})",
                        self.link.ready_timeout.as_secs_f64(),
                        state.name()
                    )));
                }
            }
        }
    }

    fn request_reconnect(&self) -> Result<(), CallError> {
        match self.commands.try_send(Command::Reconnect) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Closed(_)) => Err(CallError::Shutdown),
        }
    }

    /// Interpret a 2xx reply and wait for the call to complete
    async fn settle_reply(&self, admission: Admission, reply: PostReply) -> ResponseEnvelope {
        let Admission { id, awaiter, .. } = admission;
        match immediate_outcome(id, &reply.body) {
            Some(Ok(result)) => {
                tracing::debug!("Request {} answered synchronously", id);
                self.link
                    .registry
                    .settle(awaiter.id(), ResponseEnvelope::success(result));
            }
            Some(Err(error)) => {
                self.link.registry.fail(awaiter.id(), &error);
            }
            None => tracing::debug!("Request {} accepted, awaiting stream delivery", id),
        }
        awaiter.wait().await
    }

    /// Drop the expired session, reconnect, and POST the call once more
    async fn retry_after_recycle(
        &self,
        admission: Admission,
        request: &McpRequest,
    ) -> ResponseEnvelope {
        let session = {
            let _gate = self.link.call_gate.lock().await;
            match self.recycle_locked(admission.generation).await {
                Ok((_, session)) => session,
                Err(e) => {
                    self.link.registry.fail(admission.awaiter.id(), &e);
                    return admission.awaiter.wait().await;
                }
            }
        };

        self.link
            .registry
            .rebind(admission.awaiter.id(), &session.session_id);
        let url = session.callback_url(&self.link.base_url);
        tracing::info!(
            "Retrying request {} on session {}",
            admission.id,
            session.session_id
        );

        match self.link.poster.post(&url, request).await {
            Ok(reply) if reply.is_success() => self.settle_reply(admission, reply).await,
            Ok(reply) => {
                let error = CallError::Transport {
                    status: reply.status,
                    body: reply.body,
                };
                self.link.registry.fail(admission.awaiter.id(), &error);
                admission.awaiter.wait().await
            }
            Err(e) => {
                let error = CallError::Network(format!("{:#}", e));
                self.link.registry.fail(admission.awaiter.id(), &error);
                admission.awaiter.wait().await
            }
        }
    }

    /// Recycle the stream unless another caller already did so since
    /// `failed_generation`, then wait for the new session
    async fn recycle_locked(
        &self,
        failed_generation: u64,
    ) -> Result<(u64, SessionDescriptor), CallError> {
        if self.link.snapshot().generation == failed_generation {
            let (ack_tx, ack_rx) = oneshot::channel();
            self.commands
                .send(Command::Recycle(ack_tx))
                .await
                .map_err(|_| CallError::Shutdown)?;
            ack_rx.await.map_err(|_| CallError::Shutdown)?;
        }
        self.ensure_ready_locked().await
    }
}

#[async_trait]
impl ToolCaller for BioMcpClient {
    async fn call(&self, tool_name: &str, params: Value) -> ResponseEnvelope {
        BioMcpClient::call(self, tool_name, params).await
    }

    async fn submit(&self, tool_name: &str, params: Value) {
        BioMcpClient::submit(self, tool_name, params).await
    }
}

fn record_outcome(tool_name: &str, started: Instant, envelope: &ResponseEnvelope) {
    let status = envelope
        .error_kind
        .map(|kind| kind.as_str())
        .unwrap_or("success");
    metrics::record_tool_call(tool_name, status, started.elapsed().as_secs_f64());
    if !envelope.success {
        tracing::warn!(
            "Tool call {} failed: {}",
            tool_name,
            envelope.error.as_deref().unwrap_or("unknown error")
        );
    }
}

/// Classify a 2xx POST body
///
/// `None` means the call was accepted for asynchronous delivery (or the body
/// is not JSON) and the result will arrive on the stream. Any body mentioning
/// `Accepted`, JSON or not, is an acknowledgement.
fn immediate_outcome(id: u64, body: &str) -> Option<Result<Value, CallError>> {
    let body = body.trim();
    if body.is_empty()
        || body.contains(ACCEPTED_MARKER)
        || body.eq_ignore_ascii_case(ACCEPTED_MARKER)
        || body.starts_with("data:")
    {
        return None;
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) => {
            tracing::debug!("Non-JSON reply body for request {}, awaiting stream", id);
            return None;
        }
    };

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        return Some(Err(CallError::Remote(McpError::from_value(error))));
    }

    if value.get("jsonrpc").is_some() {
        if let Some(reply_id) = value.get("id").and_then(request_id_key) {
            if reply_id != id.to_string() {
                return Some(Err(CallError::Protocol(format!(
                    "reply for request {} carried id {}",
                    id, reply_id
                ))));
            }
        }
        if let Some(result) = value.get("result") {
            return Some(Ok(result.clone()));
        }
    }

    Some(Ok(value))
}
