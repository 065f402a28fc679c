//! Stream Connection
//!
//! Owns the single long-lived event-stream subscription and the connection
//! state machine:
//!
//! ```text
//! Disconnected -> Connecting -> StreamOpen -> SessionReady -> Initialized
//!       ^              |             |              |              |
//!       +--------------+-------------+--------------+--------------+  (socket error / recycle)
//! ```
//!
//! A dedicated supervisor task reads frames, feeds results into the pending-call
//! registry, triggers the handshake for every announced session and drives the
//! reconnection policy when the stream drops. All state transitions are
//! published through one `watch` channel, so they are serialised and callers
//! can wait on them without ever blocking the frame loop.

use crate::mcp::envelope::ResponseEnvelope;
use crate::mcp::error::CallError;
use crate::mcp::handshake::{HandshakeGate, SessionKey};
use crate::mcp::pending::PendingCalls;
use crate::mcp::reconnect::ReconnectPolicy;
use crate::mcp::stream::{decode_frame, SessionDescriptor, StreamEvent};
use crate::mcp::transport::{CallPoster, EventSource, FrameStream};
use crate::metrics;
use futures::StreamExt;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

/// Connection state machine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No stream (initial state, after a drop, or after giving up)
    #[default]
    Disconnected,

    /// Stream GET in progress
    Connecting,

    /// Stream open, no session announced yet
    StreamOpen,

    /// Session announced, handshake not yet completed
    SessionReady(SessionDescriptor),

    /// Handshake completed; tool calls are accepted
    Initialized(SessionDescriptor),
}

impl ConnectionState {
    /// Current session, if one has been announced on the open stream
    pub fn session(&self) -> Option<&SessionDescriptor> {
        match self {
            Self::SessionReady(session) | Self::Initialized(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self, Self::Initialized(_))
    }

    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::StreamOpen => "stream_open",
            Self::SessionReady(_) => "session_ready",
            Self::Initialized(_) => "initialized",
        }
    }
}

/// Published snapshot of the connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,

    /// Incremented every time a new stream is opened
    pub generation: u64,

    /// The reconnection policy reached its ceiling and is waiting to be restarted
    pub exhausted: bool,
}

/// Requests from callers to the supervisor
#[derive(Debug)]
pub(crate) enum Command {
    /// Connect now: skip the remaining backoff, or restart an exhausted policy
    Reconnect,

    /// Drop the current stream and open a fresh one; acknowledged once the
    /// old session has been discarded
    Recycle(oneshot::Sender<()>),

    /// Stop the supervisor
    Shutdown,
}

/// State shared by the supervisor and every client handle
pub(crate) struct Link {
    pub status: watch::Sender<ConnectionStatus>,
    pub policy: Mutex<ReconnectPolicy>,
    pub registry: PendingCalls,
    pub handshake: HandshakeGate,
    pub poster: Arc<dyn CallPoster>,
    pub base_url: String,
    pub stream_url: String,
    pub ready_timeout: Duration,

    /// Serialises readiness checks with id allocation
    pub call_gate: tokio::sync::Mutex<()>,

    /// Next tool call id (monotonic, starts at 1)
    pub next_id: AtomicU64,
}

impl Link {
    pub fn snapshot(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn with_policy<R>(&self, f: impl FnOnce(&mut ReconnectPolicy) -> R) -> R {
        let mut policy = self.policy.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut policy)
    }

    fn publish(&self, state: ConnectionState) {
        self.status.send_modify(|status| {
            if status.state != state {
                tracing::debug!("Connection state: {} -> {}", status.state.name(), state.name());
            }
            status.state = state;
        });
    }

    /// Run (or reuse) the handshake for `session` and promote it to
    /// `Initialized` if it is still the current session
    pub async fn initialize(
        &self,
        generation: u64,
        session: &SessionDescriptor,
    ) -> Result<(), CallError> {
        let key = SessionKey {
            generation,
            session_id: session.session_id.clone(),
        };
        self.handshake
            .ensure(&key, &session.callback_url(&self.base_url))
            .await?;

        let promoted = self.status.send_if_modified(|status| {
            let current = status.generation == generation
                && matches!(&status.state, ConnectionState::SessionReady(s) if s == session);
            if current {
                status.state = ConnectionState::Initialized(session.clone());
            }
            current
        });
        if promoted {
            self.with_policy(|policy| policy.reset());
            tracing::info!("Tool server ready (session {})", session.session_id);
        }
        Ok(())
    }

    fn spawn_handshake(self: &Arc<Self>, generation: u64, session: SessionDescriptor) {
        let link = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = link.initialize(generation, &session).await {
                tracing::warn!("Automatic initialization of session {} failed: {}", session.session_id, e);
            }
        });
    }
}

/// How a stream cycle ended
enum CycleEnd {
    Failed,
    Recycled,
    Shutdown,
}

/// Task that owns the stream socket
pub(crate) struct StreamSupervisor {
    link: Arc<Link>,
    source: Arc<dyn EventSource>,
    commands: mpsc::Receiver<Command>,
}

impl StreamSupervisor {
    pub fn new(
        link: Arc<Link>,
        source: Arc<dyn EventSource>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            link,
            source,
            commands,
        }
    }

    pub async fn run(mut self) {
        loop {
            let generation = self.begin_cycle();

            let end = match self.source.open(&self.link.stream_url).await {
                Ok(frames) => {
                    tracing::info!("Event stream established: {}", self.link.stream_url);
                    self.link.publish(ConnectionState::StreamOpen);
                    self.pump(frames, generation).await
                }
                Err(e) => {
                    tracing::error!("Event stream connection failed: {:#}", e);
                    CycleEnd::Failed
                }
            };

            self.link.publish(ConnectionState::Disconnected);

            match end {
                CycleEnd::Shutdown => break,
                CycleEnd::Recycled => continue,
                CycleEnd::Failed => {
                    if !self.backoff().await {
                        break;
                    }
                }
            }
        }

        self.link.publish(ConnectionState::Disconnected);
        tracing::info!("Event stream supervisor stopped");
    }

    fn begin_cycle(&self) -> u64 {
        let mut generation = 0;
        self.link.status.send_modify(|status| {
            status.generation += 1;
            status.exhausted = false;
            status.state = ConnectionState::Connecting;
            generation = status.generation;
        });
        tracing::debug!("Connecting to event stream (generation {})", generation);
        generation
    }

    /// Read frames until the stream drops or a command interrupts it
    async fn pump(&mut self, mut frames: FrameStream, generation: u64) -> CycleEnd {
        loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => self.handle_frame(&frame, generation),
                    Some(Err(e)) => {
                        tracing::error!("Event stream error: {:#}", e);
                        return CycleEnd::Failed;
                    }
                    None => {
                        tracing::warn!("Event stream closed by server");
                        return CycleEnd::Failed;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect) => {}
                    Some(Command::Recycle(ack)) => {
                        tracing::info!("Dropping event stream to acquire a new session");
                        self.link.publish(ConnectionState::Disconnected);
                        let _ = ack.send(());
                        return CycleEnd::Recycled;
                    }
                    Some(Command::Shutdown) | None => return CycleEnd::Shutdown,
                },
            }
        }
    }

    fn handle_frame(&self, frame: &str, generation: u64) {
        match decode_frame(frame) {
            StreamEvent::SessionReady(session) => {
                tracing::info!(
                    "Session announced: {} (endpoint {})",
                    session.session_id,
                    session.callback_endpoint
                );
                self.link
                    .publish(ConnectionState::SessionReady(session.clone()));
                self.link.spawn_handshake(generation, session);
            }
            StreamEvent::CallSettled { id, outcome } => {
                let envelope = match outcome {
                    Ok(result) => ResponseEnvelope::success(result),
                    Err(error) => {
                        tracing::warn!("Tool server returned error for request {}: {}", id, error);
                        ResponseEnvelope::failure(&CallError::Remote(error))
                    }
                };
                self.link.registry.settle(&id, envelope);
            }
            StreamEvent::Ping => tracing::trace!("Event stream ping"),
            StreamEvent::Ignored => {}
        }
    }

    /// Wait before the next cycle; returns `false` on shutdown
    async fn backoff(&mut self) -> bool {
        let (delay, attempt, max_attempts) = self.link.with_policy(|policy| {
            let delay = policy.next_delay();
            (delay, policy.attempt(), policy.max_attempts())
        });

        let Some(delay) = delay else {
            tracing::error!(
                "Max event stream reconnect attempts reached ({}), giving up",
                max_attempts
            );
            self.link.status.send_modify(|status| status.exhausted = true);
            return self.await_restart().await;
        };

        metrics::RECONNECT_ATTEMPTS_TOTAL.inc();
        tracing::warn!(
            "Reconnecting event stream (attempt {}/{}, delay {:?})",
            attempt,
            max_attempts,
            delay
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut sleep => true,
            command = self.commands.recv() => match command {
                Some(Command::Reconnect) => true,
                Some(Command::Recycle(ack)) => {
                    let _ = ack.send(());
                    true
                }
                Some(Command::Shutdown) | None => false,
            },
        }
    }

    /// Exhausted: only an explicit request starts a new cycle
    async fn await_restart(&mut self) -> bool {
        match self.commands.recv().await {
            Some(Command::Reconnect) => {
                tracing::info!("Restarting event stream reconnection");
                self.link.with_policy(|policy| policy.reset());
                true
            }
            Some(Command::Recycle(ack)) => {
                self.link.with_policy(|policy| policy.reset());
                let _ = ack.send(());
                true
            }
            Some(Command::Shutdown) | None => false,
        }
    }
}
