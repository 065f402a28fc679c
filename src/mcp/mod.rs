//! BioMCP Tool Server Client
//!
//! Client for a remote biomedical tool server that answers JSON-RPC tool calls
//! asynchronously over a long-lived server-sent event stream, while the calls
//! themselves are delivered by HTTP POST.
//!
//! # Architecture
//!
//! The implementation is organized into four layers:
//!
//! 1. **Protocol Layer** (`protocol`, `stream`): JSON-RPC 2.0 message types,
//!    SSE framing and stream frame classification
//! 2. **Transport Layer** (`transport`, `http_transport`): the event source and
//!    call poster seams and their reqwest implementation
//! 3. **Connection Layer** (`connection`, `reconnect`, `handshake`): stream
//!    supervision, backoff and the per-session initialize exchange
//! 4. **Client Layer** (`client`, `pending`, `envelope`): the call gate, request
//!    id correlation with per-call timeouts, and the uniform result envelope
//!
//! # Design Principles
//!
//! - **One reader**: a single supervisor task owns the stream socket; frame
//!   decoding never waits on a caller
//! - **Exactly-once settlement**: every pending call is completed by exactly one
//!   of result, timeout or cancellation
//! - **No escaping errors**: callers always receive a [`ResponseEnvelope`]

// Protocol layer: JSON-RPC 2.0 message types
pub mod protocol;

// Event stream framing and frame classification
pub mod stream;

// Transport seams (event source, call poster)
pub mod transport;

// HTTP transport for the remote tool server
pub mod http_transport;

// Reconnection backoff and session expiry detection
pub mod reconnect;

// Initialize / initialized exchange
pub mod handshake;

// Stream supervisor and connection state machine
pub mod connection;

// Request id to awaiter correlation
pub mod pending;

// Call failure taxonomy
pub mod error;

// Uniform result shape
pub mod envelope;

// Client layer: public call surface
pub mod client;

// Re-export commonly used types for convenience
pub use protocol::{ClientCapabilities, ClientInfo, InitializeParams, McpError, McpRequest, McpResponse};

pub use stream::{SessionDescriptor, StreamEvent};

pub use transport::{CallPoster, EventSource, FrameStream, PostReply};
pub use http_transport::HttpTransport;

pub use reconnect::ReconnectPolicy;
pub use connection::{ConnectionState, ConnectionStatus};
pub use pending::{CallAwaiter, PendingCalls};
pub use error::{CallError, FailureKind};
pub use envelope::ResponseEnvelope;

pub use client::{BioMcpClient, ClientSettings, ToolCaller};

// Property-based tests module
#[cfg(test)]
mod proptests;
