//! RPC Client Error Types
//!
//! Every failure the client can hit while servicing a tool call. None of these
//! escape [`crate::mcp::BioMcpClient::call`]; they are folded into a
//! [`ResponseEnvelope`](crate::mcp::ResponseEnvelope) at the boundary.

use crate::mcp::protocol::McpError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error types for tool calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallError {
    /// The connection could not reach the initialized state
    #[error("Not connected to tool server: {0}")]
    NotConnected(String),

    /// The initialize/initialized exchange failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// No result arrived within the call budget
    #[error("Request {id} timeout after {}s: no response from tool server", .after.as_secs())]
    Timeout { id: String, after: Duration },

    /// HTTP-level failure (status and body preserved)
    #[error("Transport error (HTTP {status}): {body}")]
    Transport { status: u16, body: String },

    /// Client-side network failure (no HTTP status available)
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a JSON-RPC error object
    #[error("{}", .0.message)]
    Remote(McpError),

    /// Unexpected or malformed protocol traffic
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client was shut down while the call was in flight
    #[error("Client shut down")]
    Shutdown,
}

impl CallError {
    /// Machine-readable classification of this error
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotConnected(_) | Self::Shutdown => FailureKind::NotConnected,
            Self::HandshakeFailed(_) => FailureKind::HandshakeFailed,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Transport { .. } | Self::Network(_) => FailureKind::Transport,
            Self::Remote(_) => FailureKind::RemoteError,
            Self::Protocol(_) => FailureKind::Protocol,
        }
    }
}

/// Failure taxonomy surfaced to callers inside the envelope
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureKind {
    NotConnected,
    HandshakeFailed,
    Timeout,
    Transport,
    RemoteError,
    Protocol,
}

impl FailureKind {
    /// Label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::HandshakeFailed => "handshake_failed",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::RemoteError => "remote_error",
            Self::Protocol => "protocol",
        }
    }
}
