//! Tool Server Integration Scenarios
//!
//! Drives the full client (supervisor, handshake, call gate, registry) against
//! an in-memory tool server that implements both transport seams. The fake
//! server can refuse connections, announce sessions, script POST replies and
//! push arbitrary frames onto the current stream.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use biomcp_client::biomedical::{BiomedicalQuery, BiomedicalSearch, QueryParameters};
use biomcp_client::mcp::{
    BioMcpClient, CallPoster, ClientSettings, ConnectionState, EventSource, FailureKind,
    FrameStream, McpRequest, PendingCalls, PostReply, ResponseEnvelope,
};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const BASE_URL: &str = "http://tool.test";

/// Scripted reply to a `tools/call` POST
#[derive(Debug, Clone)]
enum CallReply {
    Status(u16, String),
    NetworkError,
}

/// In-memory tool server
struct FakeToolServer {
    /// Stream opens attempted
    opens: AtomicUsize,
    /// Refuse every stream open
    refuse_streams: AtomicBool,
    /// Sender for the most recently opened stream
    stream: Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Every POST received, in order
    posts: Mutex<Vec<(String, McpRequest)>>,
    /// Status for handshake POSTs
    handshake_status: AtomicU16,
    /// Replies for `tools/call`, default 202 Accepted when empty
    call_replies: Mutex<VecDeque<CallReply>>,
    /// Push a result frame for every accepted call
    echo_results: AtomicBool,
}

impl FakeToolServer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            refuse_streams: AtomicBool::new(false),
            stream: Mutex::new(None),
            posts: Mutex::new(Vec::new()),
            handshake_status: AtomicU16::new(200),
            call_replies: Mutex::new(VecDeque::new()),
            echo_results: AtomicBool::new(false),
        })
    }

    fn session_id(open: usize) -> String {
        format!("{:08x}", 0xabc000 + open)
    }

    fn push(&self, frame: impl Into<String>) {
        if let Some(tx) = self.stream.lock().unwrap().as_ref() {
            let _ = tx.send(frame.into());
        }
    }

    fn push_result(&self, id: u64, result: Value) {
        self.push(json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string());
    }

    /// Drop the current stream, as if the socket closed
    fn drop_stream(&self) {
        self.stream.lock().unwrap().take();
    }

    fn script_calls(&self, replies: Vec<CallReply>) {
        self.call_replies.lock().unwrap().extend(replies);
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn posts_for(&self, method: &str) -> Vec<(String, McpRequest)> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, request)| request.method == method)
            .cloned()
            .collect()
    }

    fn methods(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.method.clone())
            .collect()
    }

    fn tool_calls(&self) -> Vec<(String, McpRequest)> {
        self.posts_for("tools/call")
    }
}

#[async_trait]
impl EventSource for FakeToolServer {
    async fn open(&self, _url: &str) -> Result<FrameStream> {
        let open = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refuse_streams.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(format!(
            "/messages/?session_id={}",
            Self::session_id(open)
        ));
        *self.stream.lock().unwrap() = Some(tx);

        let frames = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|frame| (Ok(frame), rx))
        });
        Ok(Box::pin(frames))
    }
}

#[async_trait]
impl CallPoster for FakeToolServer {
    async fn post(&self, url: &str, message: &McpRequest) -> Result<PostReply> {
        self.posts
            .lock()
            .unwrap()
            .push((url.to_string(), message.clone()));

        if message.method != "tools/call" {
            let status = self.handshake_status.load(Ordering::SeqCst);
            return Ok(PostReply::new(status, "Accepted"));
        }

        let reply = self
            .call_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CallReply::Status(202, "Accepted".to_string()));

        match reply {
            CallReply::NetworkError => Err(anyhow!("connection reset by peer")),
            CallReply::Status(status, body) => {
                if (200..300).contains(&status) && self.echo_results.load(Ordering::SeqCst) {
                    let id = message.id.unwrap_or_default();
                    let arguments = message
                        .params
                        .as_ref()
                        .map(|p| p["arguments"].clone())
                        .unwrap_or(Value::Null);
                    self.push_result(
                        id,
                        json!({"content": [{"type": "text", "text": arguments["q"]}]}),
                    );
                }
                Ok(PostReply::new(status, body))
            }
        }
    }
}

fn settings() -> ClientSettings {
    ClientSettings::new(BASE_URL)
        .with_call_timeout(Duration::from_secs(5))
        .with_ready_timeout(Duration::from_secs(2))
        .with_reconnect(Duration::from_millis(10), 3)
}

fn client(server: &Arc<FakeToolServer>, settings: ClientSettings) -> BioMcpClient {
    BioMcpClient::with_transport(settings, server.clone(), server.clone())
}

/// Poll until `condition` holds or two seconds pass
async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn text_of(envelope: &ResponseEnvelope) -> Value {
    envelope.content()[0]["text"].clone()
}

// ============================================================================
// Scenario A: stream never connects
// ============================================================================

#[tokio::test]
async fn test_unreachable_server_fails_fast() {
    let server = FakeToolServer::new();
    server.refuse_streams.store(true, Ordering::SeqCst);
    let client = client(
        &server,
        settings().with_reconnect(Duration::from_millis(5), 2),
    );

    let envelope = tokio::time::timeout(
        Duration::from_secs(5),
        client.call("search", json!({"query": "BRCA1"})),
    )
    .await
    .expect("call must return within a bounded time");

    assert!(!envelope.success);
    assert_eq!(envelope.error_kind, Some(FailureKind::NotConnected));
    assert!(envelope.error.is_some());
    assert!(server.tool_calls().is_empty());
}

// ============================================================================
// Scenario B: accepted call answered on the stream
// ============================================================================

#[tokio::test]
async fn test_accepted_call_resolves_from_stream() {
    let server = FakeToolServer::new();
    let client = client(&server, settings());

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call("search", json!({"query": "BRCA1"})).await })
    };

    eventually(|| server.tool_calls().len() == 1).await;
    server.push_result(1, json!({"content": [{"type": "text", "text": "PMID:123"}]}));

    let envelope = call.await.unwrap();
    assert!(envelope.success);
    assert_eq!(
        envelope.data,
        Some(json!({"content": [{"type": "text", "text": "PMID:123"}]}))
    );
    assert_eq!(envelope.request_id.as_deref(), Some("1"));
    assert_eq!(
        envelope.session_id,
        Some(FakeToolServer::session_id(1))
    );

    // Handshake precedes the call, all on the announced endpoint
    assert_eq!(
        server.methods(),
        vec!["initialize", "notifications/initialized", "tools/call"]
    );
    let initialize = &server.posts_for("initialize")[0].1;
    assert_eq!(initialize.id, Some(0));
    assert_eq!(
        initialize.params.as_ref().unwrap()["protocolVersion"],
        "2025-06-18"
    );

    let (url, request) = &server.tool_calls()[0];
    assert_eq!(
        url,
        &format!("{}/messages/?session_id={}", BASE_URL, FakeToolServer::session_id(1))
    );
    assert_eq!(request.id, Some(1));
    assert_eq!(request.params.as_ref().unwrap()["name"], "search");
    assert!(client.state().is_initialized());
}

#[tokio::test]
async fn test_immediate_json_reply_bypasses_stream() {
    let server = FakeToolServer::new();
    server.script_calls(vec![CallReply::Status(
        200,
        r#"{"jsonrpc":"2.0","id":1,"result":{"content":[{"type":"text","text":"sync"}]}}"#
            .to_string(),
    )]);
    let client = client(&server, settings());

    let envelope = client.call("search", json!({})).await;
    assert!(envelope.success);
    assert_eq!(text_of(&envelope), "sync");
    assert_eq!(client.pending_calls(), 0);
}

#[tokio::test]
async fn test_json_acknowledgement_waits_for_stream() {
    let server = FakeToolServer::new();
    server.script_calls(vec![CallReply::Status(
        202,
        r#"{"status":"Accepted"}"#.to_string(),
    )]);
    let client = client(&server, settings());

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call("search", json!({"query": "TP53"})).await })
    };

    eventually(|| server.tool_calls().len() == 1).await;
    server.push_result(1, json!({"content": [{"type": "text", "text": "streamed"}]}));

    let envelope = call.await.unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.content().len(), 1);
    assert_eq!(text_of(&envelope), "streamed");
}

#[tokio::test]
async fn test_remote_error_is_surfaced() {
    let server = FakeToolServer::new();
    let client = client(&server, settings());

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call("search", json!({"page_size": 500})).await })
    };

    eventually(|| server.tool_calls().len() == 1).await;
    server.push(
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32602, "message": "page_size must be <= 100"}
        })
        .to_string(),
    );

    let envelope = call.await.unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.error_kind, Some(FailureKind::RemoteError));
    assert_eq!(envelope.error.as_deref(), Some("page_size must be <= 100"));
    assert_eq!(envelope.data.unwrap()["code"], -32602);
}

#[tokio::test]
async fn test_plain_http_failure_is_transport_error() {
    let server = FakeToolServer::new();
    server.script_calls(vec![CallReply::Status(500, "internal error".to_string())]);
    let client = client(&server, settings());

    let envelope = client.call("search", json!({})).await;
    assert!(!envelope.success);
    assert_eq!(envelope.error_kind, Some(FailureKind::Transport));
    assert!(envelope.error.unwrap().contains("500"));
    // Not an expiry: no reconnect
    assert_eq!(server.opens(), 1);
}

#[tokio::test]
async fn test_post_exception_falls_back_to_stream() {
    let server = FakeToolServer::new();
    server.script_calls(vec![CallReply::NetworkError]);
    let client = client(&server, settings());

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call("search", json!({})).await })
    };

    eventually(|| server.tool_calls().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    server.push_result(1, json!({"content": [{"type": "text", "text": "late"}]}));

    let envelope = call.await.unwrap();
    assert!(envelope.success);
    assert_eq!(text_of(&envelope), "late");
}

// ============================================================================
// Scenario C: session expiry mid-call
// ============================================================================

#[tokio::test]
async fn test_expired_session_reconnects_and_retries_once() {
    let server = FakeToolServer::new();
    server.echo_results.store(true, Ordering::SeqCst);
    server.script_calls(vec![
        CallReply::Status(401, "Unauthorized".to_string()),
        CallReply::Status(202, "Accepted".to_string()),
    ]);
    let client = client(&server, settings());

    let envelope = client.call("search", json!({"q": "retry"})).await;

    assert!(envelope.success, "{:?}", envelope.error);
    assert_eq!(text_of(&envelope), "retry");
    assert_eq!(server.opens(), 2);
    // Reported on the session that delivered it
    assert_eq!(envelope.session_id, Some(FakeToolServer::session_id(2)));

    let calls = server.tool_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].0.contains(&FakeToolServer::session_id(1)));
    assert!(calls[1].0.contains(&FakeToolServer::session_id(2)));
    // Fresh session, fresh handshake
    assert_eq!(server.posts_for("initialize").len(), 2);
}

#[tokio::test]
async fn test_expired_retry_failure_is_not_retried_again() {
    let server = FakeToolServer::new();
    server.script_calls(vec![
        CallReply::Status(401, "Unauthorized".to_string()),
        CallReply::Status(403, "session expired".to_string()),
    ]);
    let client = client(&server, settings());

    let envelope = client.call("search", json!({})).await;

    assert!(!envelope.success);
    assert_eq!(envelope.error_kind, Some(FailureKind::Transport));
    assert!(envelope.error.unwrap().contains("403"));
    assert_eq!(server.tool_calls().len(), 2);
    assert_eq!(server.opens(), 2);
}

#[tokio::test]
async fn test_expiry_marker_in_body_triggers_retry() {
    let server = FakeToolServer::new();
    server.echo_results.store(true, Ordering::SeqCst);
    server.script_calls(vec![CallReply::Status(
        404,
        "Could not find session".to_string(),
    )]);
    let client = client(&server, settings());

    let envelope = client.call("search", json!({"q": "marker"})).await;
    assert!(envelope.success);
    assert_eq!(server.tool_calls().len(), 2);
}

// ============================================================================
// Scenario D: no result within the call budget
// ============================================================================

#[tokio::test]
async fn test_silent_server_times_out() {
    let server = FakeToolServer::new();
    let client = client(
        &server,
        settings().with_call_timeout(Duration::from_millis(150)),
    );

    let envelope = client.call("search", json!({})).await;

    assert!(!envelope.success);
    assert_eq!(envelope.error_kind, Some(FailureKind::Timeout));
    assert!(envelope.error.unwrap().contains("timeout"));
    assert_eq!(client.pending_calls(), 0);

    // A late answer is unmatched and harmless
    server.push_result(1, json!({"content": []}));
    server.echo_results.store(true, Ordering::SeqCst);
    let envelope = client.call("search", json!({"q": "after"})).await;
    assert!(envelope.success);
}

// ============================================================================
// Scenario E: out-of-order results
// ============================================================================

#[tokio::test]
async fn test_results_are_routed_by_id() {
    let server = FakeToolServer::new();
    let client = client(&server, settings());

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.call("search", json!({"q": "first"})).await })
    };
    let second = {
        let client = client.clone();
        tokio::spawn(async move { client.call("search", json!({"q": "second"})).await })
    };

    eventually(|| server.tool_calls().len() == 2).await;
    let id_of = |q: &str| {
        server
            .tool_calls()
            .iter()
            .find(|(_, r)| r.params.as_ref().unwrap()["arguments"]["q"] == q)
            .and_then(|(_, r)| r.id)
            .unwrap()
    };
    let (first_id, second_id) = (id_of("first"), id_of("second"));
    assert_ne!(first_id, second_id);

    // Deliver in reverse order
    let (later, earlier) = if first_id < second_id {
        ((second_id, "second"), (first_id, "first"))
    } else {
        ((first_id, "first"), (second_id, "second"))
    };
    for (id, q) in [later, earlier] {
        server.push_result(id, json!({"content": [{"type": "text", "text": q}]}));
    }

    assert_eq!(text_of(&first.await.unwrap()), "first");
    assert_eq!(text_of(&second.await.unwrap()), "second");
}

// ============================================================================
// P1: id uniqueness under concurrency
// ============================================================================

#[tokio::test]
async fn test_concurrent_calls_get_distinct_ids() {
    let server = FakeToolServer::new();
    server.echo_results.store(true, Ordering::SeqCst);
    let client = client(&server, settings());

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                let q = format!("call-{}", i);
                (q.clone(), client.call("search", json!({"q": q})).await)
            })
        })
        .collect();

    for handle in handles {
        let (q, envelope) = handle.await.unwrap();
        assert!(envelope.success);
        assert_eq!(text_of(&envelope), q);
    }

    let ids: HashSet<u64> = server
        .tool_calls()
        .iter()
        .filter_map(|(_, r)| r.id)
        .collect();
    assert_eq!(ids.len(), 20);
    assert!(!ids.contains(&0));
    assert_eq!(client.pending_calls(), 0);
}

// ============================================================================
// P2: settle racing a timeout delivers exactly once
// ============================================================================

#[tokio::test]
async fn test_settle_and_timeout_are_exclusive() {
    for round in 0..25u64 {
        let registry = PendingCalls::new(Duration::from_millis(10));
        let awaiter = registry.register(round + 1, None);

        let settler = {
            let registry = registry.clone();
            let id = (round + 1).to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry.settle(&id, ResponseEnvelope::success(json!({"round": round})))
            })
        };

        let envelope = awaiter.wait().await;
        let settled = settler.await.unwrap();

        // Whoever lost the race found nothing to complete
        assert_eq!(envelope.success, settled);
        assert!(registry.is_empty());
    }
}

// ============================================================================
// P3: backoff ceiling
// ============================================================================

#[tokio::test]
async fn test_reconnects_stop_at_ceiling() {
    let server = FakeToolServer::new();
    server.refuse_streams.store(true, Ordering::SeqCst);
    let client = client(
        &server,
        settings().with_reconnect(Duration::from_millis(10), 3),
    );

    // 10 + 20 + 40 ms of backoff, then the policy gives up
    eventually(|| client.status().exhausted).await;
    assert_eq!(server.opens(), 4);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.opens(), 4);
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // A call restarts the policy once the server is back
    server.refuse_streams.store(false, Ordering::SeqCst);
    server.echo_results.store(true, Ordering::SeqCst);
    let envelope = client.call("search", json!({"q": "back"})).await;
    assert!(envelope.success);
    assert!(!client.status().exhausted);
}

// ============================================================================
// P4: session rotation forces a fresh handshake
// ============================================================================

#[tokio::test]
async fn test_new_session_requires_handshake_before_call() {
    let server = FakeToolServer::new();
    server.echo_results.store(true, Ordering::SeqCst);
    let client = client(&server, settings());

    assert!(client.call("search", json!({"q": "one"})).await.success);
    assert_eq!(server.posts_for("initialize").len(), 1);

    server.drop_stream();
    eventually(|| server.opens() == 2).await;

    let envelope = client.call("search", json!({"q": "two"})).await;
    assert!(envelope.success);
    assert_eq!(envelope.session_id, Some(FakeToolServer::session_id(2)));

    let methods = server.methods();
    let last_call = methods.iter().rposition(|m| m == "tools/call").unwrap();
    let last_initialized = methods
        .iter()
        .rposition(|m| m == "notifications/initialized")
        .unwrap();
    assert_eq!(server.posts_for("initialize").len(), 2);
    assert!(last_initialized < last_call);

    let (url, _) = server.tool_calls().pop().unwrap();
    assert!(url.ends_with(&FakeToolServer::session_id(2)));
}

#[tokio::test]
async fn test_handshake_failure_blocks_call() {
    let server = FakeToolServer::new();
    server.handshake_status.store(500, Ordering::SeqCst);
    let client = client(&server, settings());

    let envelope = client.call("search", json!({})).await;

    assert!(!envelope.success);
    assert_eq!(envelope.error_kind, Some(FailureKind::HandshakeFailed));
    assert!(server.tool_calls().is_empty());
    assert!(matches!(client.state(), ConnectionState::SessionReady(_)));

    // Next attempt succeeds once the server recovers
    server.handshake_status.store(200, Ordering::SeqCst);
    server.echo_results.store(true, Ordering::SeqCst);
    assert!(client.call("search", json!({"q": "ok"})).await.success);
}

// ============================================================================
// P5: unknown ids do not disturb the stream
// ============================================================================

#[tokio::test]
async fn test_unknown_id_is_dropped() {
    let server = FakeToolServer::new();
    let client = client(&server, settings());

    client.wait_until_ready().await.unwrap();
    server.push_result(999, json!({"content": []}));
    server.push(": ping - 2025-01-01 00:00:00");
    server.push("data: not json at all {");

    server.echo_results.store(true, Ordering::SeqCst);
    let envelope = client.call("search", json!({"q": "still alive"})).await;
    assert!(envelope.success);
    assert_eq!(text_of(&envelope), "still alive");
    assert_eq!(server.opens(), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_fails_pending_calls() {
    let server = FakeToolServer::new();
    let client = client(&server, settings());

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call("search", json!({})).await })
    };
    eventually(|| server.tool_calls().len() == 1).await;

    client.shutdown().await;

    let envelope = call.await.unwrap();
    assert!(!envelope.success);
    assert_eq!(envelope.error_kind, Some(FailureKind::NotConnected));

    eventually(|| client.state() == ConnectionState::Disconnected).await;
    let after = client.call("search", json!({})).await;
    assert!(!after.success);
}

// ============================================================================
// Domain operations over the real client
// ============================================================================

#[tokio::test]
async fn test_thought_is_posted_before_search() {
    let server = FakeToolServer::new();
    server.echo_results.store(true, Ordering::SeqCst);
    let client = client(&server, settings());
    client.wait_until_ready().await.unwrap();

    let search = BiomedicalSearch::new(Arc::new(client.clone()));
    let text = "BRCA1 in breast cancer";
    let parameters = QueryParameters::from_text(text, "article", 5);
    let query = BiomedicalQuery::from_label(text, "literature", parameters).unwrap();
    let results = search.search_literature(&query).await;
    assert_eq!(results.len(), 1);

    let calls = server.tool_calls();
    let tools: Vec<_> = calls
        .iter()
        .map(|(_, r)| (r.params.as_ref().unwrap()["name"].clone(), r.id))
        .collect();
    assert_eq!(
        tools,
        vec![(json!("think"), Some(1)), (json!("search"), Some(2))]
    );
}

#[tokio::test]
async fn test_think_meta_is_hoisted() {
    let server = FakeToolServer::new();
    server.echo_results.store(true, Ordering::SeqCst);
    let client = client(&server, settings());

    client
        .call(
            "think",
            json!({"thought": "x", "q": "t", "_meta": {"progressToken": 1}}),
        )
        .await;

    let (_, request) = server.tool_calls().pop().unwrap();
    let params = request.params.unwrap();
    assert_eq!(params["_meta"], json!({"progressToken": 1}));
    assert!(params["arguments"].get("_meta").is_none());
}
