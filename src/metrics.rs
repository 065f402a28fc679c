// Prometheus metrics for the BioMCP client
//
// - Tool calls by tool and outcome (counter)
// - Tool call latency (histogram)
// - Stream reconnect attempts (counter)
// - Handshake outcomes (counter)
// - Unmatched stream responses (counter)
// - Pending calls (gauge)

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref TOOL_CALLS_TOTAL: CounterVec = CounterVec::new(
        prometheus::Opts::new("biomcp_tool_calls_total", "Total number of tool calls"),
        &["tool_name", "status"]
    ).expect("Failed to create tool calls metric");

    pub static ref TOOL_CALL_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("biomcp_tool_call_duration_seconds", "Duration of tool calls"),
        &["tool_name"]
    ).expect("Failed to create tool call duration metric");

    pub static ref RECONNECT_ATTEMPTS_TOTAL: IntCounter = IntCounter::new(
        "biomcp_reconnect_attempts_total",
        "Total number of event stream reconnect attempts"
    ).expect("Failed to create reconnect attempts metric");

    pub static ref HANDSHAKES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("biomcp_handshakes_total", "Session handshakes by outcome"),
        &["status"]
    ).expect("Failed to create handshakes metric");

    pub static ref UNMATCHED_RESPONSES_TOTAL: IntCounter = IntCounter::new(
        "biomcp_unmatched_responses_total",
        "Stream responses with no pending request"
    ).expect("Failed to create unmatched responses metric");

    pub static ref PENDING_CALLS: IntGauge = IntGauge::new(
        "biomcp_pending_calls",
        "Number of tool calls awaiting a result"
    ).expect("Failed to create pending calls metric");
}

/// Initialize metrics registry - call once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(TOOL_CALLS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOOL_CALL_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(RECONNECT_ATTEMPTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HANDSHAKES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNMATCHED_RESPONSES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PENDING_CALLS.clone()))?;
    Ok(())
}

/// Record the outcome of one tool call
pub fn record_tool_call(tool_name: &str, status: &str, duration_secs: f64) {
    TOOL_CALLS_TOTAL
        .with_label_values(&[tool_name, status])
        .inc();
    TOOL_CALL_DURATION_SECONDS
        .with_label_values(&[tool_name])
        .observe(duration_secs);
}

/// Render all registered metrics in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
