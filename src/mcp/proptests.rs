//! Property-Based Tests for the BioMCP Client
//!
//! Invariants checked over random inputs:
//!
//! - **Backoff**: delay for attempt `k` is `base * 2^k`, and the policy stops
//!   after exactly `max_attempts` failures until reset
//! - **Session tokens**: both historical encodings are recognised and the
//!   callback endpoint is preserved verbatim
//! - **Frame decoding**: arbitrary input never panics; results are routed by id
//!   regardless of whether the id is numeric or a string
//! - **SSE framing**: chunk boundaries do not change the decoded frames
//!
//! # Running the Tests
//!
//! ```bash
//! cargo test --lib mcp::proptests
//! ```

use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

use crate::mcp::protocol::{request_id_key, McpError, McpRequest};
use crate::mcp::reconnect::{is_session_expired, ReconnectPolicy};
use crate::mcp::stream::{decode_frame, parse_session_announcement, SseDecoder, StreamEvent};

// Helper: Generate arbitrary JSON scalars and small arrays
fn arb_json_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9 ]*".prop_map(Value::String),
        prop::collection::vec(any::<i64>().prop_map(|n| Value::Number(n.into())), 0..3)
            .prop_map(Value::Array),
    ]
}

// ============================================================================
// Property 1: Reconnection Backoff
// ============================================================================

proptest! {
    /// Delay for attempt k is exactly base * 2^k
    #[test]
    fn prop_backoff_doubles_per_attempt(
        base_delay_ms in 1u64..5000,
        attempt in 0u32..16
    ) {
        let policy = ReconnectPolicy::new(Duration::from_millis(base_delay_ms), 20);
        let expected = Duration::from_millis(base_delay_ms * (1u64 << attempt));

        prop_assert_eq!(policy.delay_for(attempt), expected);
        if attempt > 0 {
            prop_assert_eq!(policy.delay_for(attempt), policy.delay_for(attempt - 1) * 2);
        }
    }

    /// The policy yields exactly max_attempts delays, then stops until reset
    #[test]
    fn prop_backoff_stops_at_ceiling(
        base_delay_ms in 1u64..100,
        max_attempts in 0u32..12
    ) {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(base_delay_ms), max_attempts);

        for k in 0..max_attempts {
            prop_assert_eq!(policy.next_delay(), Some(policy.delay_for(k)));
        }
        prop_assert!(policy.is_exhausted());
        prop_assert_eq!(policy.next_delay(), None);
        prop_assert_eq!(policy.next_delay(), None);

        policy.reset();
        prop_assert_eq!(policy.attempt(), 0);
        if max_attempts > 0 {
            prop_assert_eq!(policy.next_delay(), Some(Duration::from_millis(base_delay_ms)));
        }
    }

    /// Very large attempt numbers saturate rather than overflow
    #[test]
    fn prop_backoff_never_panics(attempt in any::<u32>()) {
        let policy = ReconnectPolicy::default();
        let _ = policy.delay_for(attempt);
    }
}

// ============================================================================
// Property 2: Session Announcements
// ============================================================================

proptest! {
    /// `session_id=` tokens are extracted from the callback endpoint
    #[test]
    fn prop_snake_case_token_extracted(session_id in "[0-9a-f]{8,32}") {
        let frame = format!("/messages/?session_id={}", session_id);
        let descriptor = parse_session_announcement(&frame).unwrap();

        prop_assert_eq!(descriptor.session_id, session_id);
        prop_assert_eq!(descriptor.callback_endpoint, frame);
    }

    /// `sessionId=` tokens (uuid form) are extracted from the callback endpoint
    #[test]
    fn prop_camel_case_token_extracted(
        a in "[0-9a-f]{8}",
        b in "[0-9a-f]{4}",
        c in "[0-9a-f]{12}"
    ) {
        let session_id = format!("{}-{}-{}", a, b, c);
        let frame = format!("/message?sessionId={}", session_id);
        let descriptor = parse_session_announcement(&frame).unwrap();

        prop_assert_eq!(descriptor.session_id, session_id);
    }

    /// Announcements are recognised with or without the `data:` prefix
    #[test]
    fn prop_announcement_prefix_is_optional(session_id in "[0-9a-f]{8,32}") {
        let bare = format!("/messages/?session_id={}", session_id);
        let prefixed = format!("data: {}", bare);

        let expected = parse_session_announcement(&bare).unwrap();
        match decode_frame(&prefixed) {
            StreamEvent::SessionReady(descriptor) => prop_assert_eq!(descriptor, expected),
            other => prop_assert!(false, "unexpected event: {:?}", other),
        }
    }
}

// ============================================================================
// Property 3: Frame Decoding
// ============================================================================

proptest! {
    /// Arbitrary input never panics the decoder
    #[test]
    fn prop_decode_frame_total(frame in ".*") {
        let _ = decode_frame(&frame);
    }

    /// Results are keyed identically for numeric and string ids
    #[test]
    fn prop_result_routed_by_id(
        id in 1u64..100_000,
        result in arb_json_value().prop_filter("null results are absent", |v| !v.is_null())
    ) {
        let numeric = json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string();
        let string = json!({"jsonrpc": "2.0", "id": id.to_string(), "result": result}).to_string();

        for frame in [numeric, string] {
            match decode_frame(&frame) {
                StreamEvent::CallSettled { id: key, outcome } => {
                    prop_assert_eq!(key, id.to_string());
                    prop_assert_eq!(outcome.unwrap(), result.clone());
                }
                other => prop_assert!(false, "unexpected event: {:?}", other),
            }
        }
    }

    /// Error frames keep the server's code and message
    #[test]
    fn prop_error_frame_preserves_server_error(
        id in 1u64..1000,
        code in -32768i64..-32000,
        message in "[a-zA-Z ]{1,40}"
    ) {
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        })
        .to_string();

        match decode_frame(&frame) {
            StreamEvent::CallSettled { outcome: Err(error), .. } => {
                prop_assert_eq!(error, McpError::new(code, message));
            }
            other => prop_assert!(false, "unexpected event: {:?}", other),
        }
    }

    /// Only numbers and strings are usable ids
    #[test]
    fn prop_request_id_key_rejects_structured_ids(value in arb_json_value()) {
        let key = request_id_key(&value);
        prop_assert_eq!(key.is_some(), value.is_number() || value.is_string());
    }
}

// ============================================================================
// Property 4: SSE Framing
// ============================================================================

proptest! {
    /// Splitting the byte stream at any point yields the same frames
    #[test]
    fn prop_sse_chunking_is_transparent(
        payloads in prop::collection::vec("[a-zA-Z0-9{}\":,]{1,30}", 1..6),
        split in any::<prop::sample::Index>()
    ) {
        let body: String = payloads
            .iter()
            .map(|p| format!("data: {}\r\n\r\n", p))
            .collect();
        let bytes = body.as_bytes();
        let cut = split.index(bytes.len() + 1);

        let mut decoder = SseDecoder::new();
        let mut frames = decoder.push(&bytes[..cut]);
        frames.extend(decoder.push(&bytes[cut..]));

        prop_assert_eq!(frames, payloads);
    }
}

// ============================================================================
// Property 5: Requests and Session Expiry
// ============================================================================

proptest! {
    /// Tool calls carry the allocated id and the tool name
    #[test]
    fn prop_tool_call_shape(id in 1u64..1_000_000, name in "[a-z_]{1,20}") {
        let request = McpRequest::tool_call(id, &name, json!({"query": "x"}));
        let value = serde_json::to_value(&request).unwrap();

        prop_assert_eq!(&value["jsonrpc"], "2.0");
        prop_assert_eq!(&value["id"], &json!(id));
        prop_assert_eq!(&value["method"], "tools/call");
        prop_assert_eq!(&value["params"]["name"], &json!(name));
    }

    /// 401 and 403 always mean an expired session
    #[test]
    fn prop_auth_statuses_expire_session(body in "[a-z ]*", forbidden in any::<bool>()) {
        let status = if forbidden { 403 } else { 401 };
        prop_assert!(is_session_expired(status, &body));
    }

    /// Other failures only count as expiry when the body says so
    #[test]
    fn prop_other_statuses_need_marker(status in 500u16..600, body in "[0-9 ]*") {
        prop_assert!(!is_session_expired(status, &body));
        let marked = format!("{} session expired", body);
        prop_assert!(is_session_expired(status, &marked));
    }
}
