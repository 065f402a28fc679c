//! BioMCP Client Library
//!
//! This library provides the client for the BioMCP biomedical tool server:
//! the event-stream JSON-RPC transport, the call facade, and the domain
//! operations built on it.

pub mod biomedical;
pub mod config;
pub mod logging;
pub mod mcp;
pub mod metrics;
