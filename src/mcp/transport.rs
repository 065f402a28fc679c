//! MCP Transport Layer
//!
//! This module defines the two transport abstractions the client is built on:
//!
//! - [`EventSource`]: the long-lived server-to-client event stream
//! - [`CallPoster`]: synchronous POSTs to the session's callback endpoint
//!
//! # Architecture
//!
//! The transport layer is responsible only for moving bytes. Frame
//! classification lives in [`crate::mcp::stream`]; call correlation and session
//! management live in [`crate::mcp::client`].

use crate::mcp::protocol::McpRequest;
use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Decoded frames of one stream subscription
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Source of event-stream subscriptions
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a new subscription to `url`
    ///
    /// # Returns
    ///
    /// A stream of frames that ends (or yields an error) when the socket drops
    async fn open(&self, url: &str) -> Result<FrameStream>;
}

/// Raw outcome of an HTTP POST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostReply {
    /// HTTP status code
    pub status: u16,

    /// Response body as text
    pub body: String,
}

impl PostReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends JSON-RPC messages to a callback endpoint
#[async_trait]
pub trait CallPoster: Send + Sync {
    /// POST `message` as JSON to `url`
    ///
    /// # Errors
    ///
    /// Returns an error only for transport-level failures (connection refused,
    /// timeout, unreadable body). Non-2xx statuses are returned as a
    /// [`PostReply`] for the caller to interpret.
    async fn post(&self, url: &str, message: &McpRequest) -> Result<PostReply>;
}
