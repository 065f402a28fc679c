//! MCP HTTP Transport Layer
//!
//! Reqwest-backed implementation of both transport seams:
//!
//! - [`EventSource`]: a `GET` with `Accept: text/event-stream` whose body is
//!   consumed incrementally and split into SSE frames
//! - [`CallPoster`]: a JSON `POST` to the callback endpoint learned from the
//!   session announcement
//!
//! The stream request has no overall timeout (it is meant to stay open for the
//! life of the session); POSTs carry a per-request timeout.
//!
//! # Example
//!
//! ```ignore
//! use biomcp_client::mcp::HttpTransport;
//!
//! let transport = HttpTransport::new()?.with_post_timeout(Duration::from_secs(60));
//! let frames = transport.open("http://localhost:8000/sse").await?;
//! ```

use crate::mcp::protocol::McpRequest;
use crate::mcp::stream::sse_frames;
use crate::mcp::transport::{CallPoster, EventSource, FrameStream, PostReply};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

/// Connect timeout shared by the stream and the POSTs
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP transport for the remote tool server
///
/// # Configuration
///
/// - **post_timeout**: POST request timeout (default: 30 seconds)
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Reqwest HTTP client (connection pool shared by stream and POSTs)
    client: reqwest::Client,

    /// Per-request timeout for POSTs
    post_timeout: Duration,
}

impl HttpTransport {
    /// Create a new HTTP transport
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            post_timeout: Duration::from_secs(30),
        })
    }

    /// Set the POST timeout
    pub fn with_post_timeout(mut self, timeout: Duration) -> Self {
        self.post_timeout = timeout;
        self
    }
}

#[async_trait]
impl EventSource for HttpTransport {
    /// Subscribe to the server's event stream
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or the server answers with a
    /// non-2xx status
    async fn open(&self, url: &str) -> Result<FrameStream> {
        tracing::debug!("Opening event stream: {}", url);

        let response = self
            .client
            .get(url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .with_context(|| format!("Failed to connect to event stream {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Event stream request failed with status: {}", status);
        }

        Ok(sse_frames(response.bytes_stream()))
    }
}

#[async_trait]
impl CallPoster for HttpTransport {
    /// Send a JSON-RPC message via HTTP POST
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Message serialization fails
    /// - HTTP request fails or times out
    /// - The response body cannot be read
    async fn post(&self, url: &str, message: &McpRequest) -> Result<PostReply> {
        let json =
            serde_json::to_string(message).context("Failed to serialize MCP request to JSON")?;

        tracing::debug!("Sending HTTP POST to {}: {}", url, json);

        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .timeout(self.post_timeout)
            .body(json)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .context("Failed to read HTTP response body")?;

        tracing::debug!("Received HTTP {} response: {}", status, body);

        Ok(PostReply { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_http_transport_creation() {
        let transport = HttpTransport::new().unwrap();
        assert_eq!(transport.post_timeout, Duration::from_secs(30));

        let transport = transport.with_post_timeout(Duration::from_secs(60));
        assert_eq!(transport.post_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_transport_trait_bounds() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpTransport>();
    }

    #[tokio::test]
    async fn test_post_returns_status_and_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/messages/"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(json!({"method": "tools/call", "id": 4})))
            .respond_with(ResponseTemplate::new(202).set_body_string("Accepted"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let url = format!("{}/messages/", mock_server.uri());
        let reply = transport
            .post(&url, &McpRequest::tool_call(4, "search", json!({})))
            .await
            .unwrap();

        assert_eq!(reply, PostReply::new(202, "Accepted"));
        assert!(reply.is_success());
    }

    #[tokio::test]
    async fn test_post_non_success_is_not_an_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("session expired"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let reply = transport
            .post(&mock_server.uri(), &McpRequest::initialized())
            .await
            .unwrap();

        assert_eq!(reply.status, 401);
        assert_eq!(reply.body, "session expired");
        assert!(!reply.is_success());
    }

    #[tokio::test]
    async fn test_post_timeout_is_transport_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new()
            .unwrap()
            .with_post_timeout(Duration::from_millis(100));
        let result = transport
            .post(&mock_server.uri(), &McpRequest::initialized())
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_open_yields_sse_frames() {
        let mock_server = MockServer::start().await;

        let body = "event: endpoint\r\ndata: /messages/?session_id=abc123\r\n\r\n\
                    : ping - 2025-01-01\r\n\r\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"content\":[]}}\r\n\r\n";

        Mock::given(method("GET"))
            .and(path("/sse"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let frames: Vec<String> = transport
            .open(&format!("{}/sse", mock_server.uri()))
            .await
            .unwrap()
            .map(|frame| frame.unwrap())
            .collect()
            .await;

        assert_eq!(
            frames,
            vec![
                "/messages/?session_id=abc123".to_string(),
                ": ping - 2025-01-01".to_string(),
                r#"{"jsonrpc":"2.0","id":1,"result":{"content":[]}}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_open_rejects_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let result = transport.open(&format!("{}/sse", mock_server.uri())).await;

        let err = result.err().unwrap();
        assert!(err.to_string().contains("503"));
    }
}
