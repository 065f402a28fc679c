//! Unified response envelope returned by every tool call.

use crate::mcp::error::{CallError, FailureKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only shape that crosses the client's outbound boundary.
///
/// `success == true` never carries an `error`; `success == false` only carries
/// `data` as diagnostics (e.g. the raw JSON-RPC error object).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl ResponseEnvelope {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            session_id: None,
            request_id: None,
            error_kind: None,
        }
    }

    pub fn failure(error: &CallError) -> Self {
        let data = match error {
            CallError::Remote(remote) => serde_json::to_value(remote).ok(),
            _ => None,
        };
        Self {
            success: false,
            data,
            error: Some(error.to_string()),
            session_id: None,
            request_id: None,
            error_kind: Some(error.kind()),
        }
    }

    pub fn with_session(mut self, session_id: Option<&str>) -> Self {
        self.session_id = session_id.map(str::to_string);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// `data.content` as a list, or empty for failures and other shapes
    pub fn content(&self) -> Vec<Value> {
        if !self.success {
            return Vec::new();
        }
        self.data
            .as_ref()
            .and_then(|data| data.get("content"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }
}

impl From<Result<Value, CallError>> for ResponseEnvelope {
    fn from(outcome: Result<Value, CallError>) -> Self {
        match outcome {
            Ok(data) => Self::success(data),
            Err(err) => Self::failure(&err),
        }
    }
}
