//! MCP Protocol Types (JSON-RPC 2.0)
//!
//! This module defines the wire types exchanged with the BioMCP tool server.
//! Calls and handshake steps go out as HTTP POST bodies; results come back either
//! in the POST response or, more commonly, as JSON frames on the event stream.
//!
//! # Protocol Specification
//!
//! - JSON-RPC 2.0: <https://www.jsonrpc.org/specification>
//! - MCP Spec: <https://modelcontextprotocol.io/specification/2025-06-18>
//!
//! # Architecture
//!
//! The protocol layer is responsible only for serialization/deserialization of MCP messages.
//! Stream framing lives in [`crate::mcp::stream`], HTTP in [`crate::mcp::http_transport`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision announced during `initialize`
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Request id reserved for the `initialize` handshake step.
///
/// Tool calls are numbered from 1, so a stream frame carrying id 0 is always
/// the (unmatched) asynchronous echo of a handshake.
pub const HANDSHAKE_REQUEST_ID: u64 = 0;

/// Tool whose `_meta` argument is hoisted into the call params.
const META_HOISTING_TOOL: &str = "think";

/// A JSON-RPC 2.0 request or notification
///
/// Requests carry an id used to correlate the asynchronous result; notifications
/// (such as `notifications/initialized`) omit it.
///
/// # Example
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": 7,
///   "method": "tools/call",
///   "params": {"name": "search", "arguments": {"query": "BRAF V600E"}}
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpRequest {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: String,

    /// Request identifier (absent for notifications)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Method name to invoke
    pub method: String,

    /// Method parameters (optional, depends on method)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    /// Create a new MCP request
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Create a notification (no id, no response expected)
    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: None,
        }
    }

    /// Build the `initialize` handshake request
    pub fn initialize(params: &InitializeParams) -> Self {
        Self::new(
            HANDSHAKE_REQUEST_ID,
            McpMethod::Initialize.as_str(),
            serde_json::to_value(params).ok(),
        )
    }

    /// Build the `notifications/initialized` acknowledgement
    pub fn initialized() -> Self {
        Self::notification(McpMethod::InitializedNotification.as_str())
    }

    /// Build a `tools/call` request
    ///
    /// For the `think` tool a `_meta` member of the arguments is moved up into
    /// `params._meta`, which is where the server reads progress tokens from.
    pub fn tool_call(id: u64, name: &str, mut arguments: Value) -> Self {
        let meta = if name == META_HOISTING_TOOL {
            arguments
                .as_object_mut()
                .and_then(|args| args.remove("_meta"))
        } else {
            None
        };

        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
            meta,
        };

        Self::new(
            id,
            McpMethod::ToolsCall.as_str(),
            serde_json::to_value(params).ok(),
        )
    }

    /// Whether this message is a notification
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response message
///
/// The id is kept as a raw JSON value: servers echo it back as either a number
/// or a string and correlation happens on its string form (see [`request_id_key`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpResponse {
    /// JSON-RPC version (servers occasionally omit it on stream frames)
    #[serde(default)]
    pub jsonrpc: Option<String>,

    /// Request identifier (must match the request's ID)
    #[serde(default)]
    pub id: Option<Value>,

    /// Result payload (present on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error information (present on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl McpResponse {
    /// Correlation key of this response, if it carries an id
    pub fn id_key(&self) -> Option<String> {
        self.id.as_ref().and_then(request_id_key)
    }

    /// Get the result, or the error if unsuccessful
    ///
    /// Returns `None` when the message carries neither (e.g. a server-side
    /// notification that merely reuses the response shape).
    pub fn into_outcome(self) -> Option<Result<Value, McpError>> {
        match (self.result, self.error) {
            (Some(result), _) if !result.is_null() => Some(Ok(result)),
            (_, Some(error)) if !error.is_null() => Some(Err(McpError::from_value(&error))),
            _ => None,
        }
    }
}

/// Coerce a JSON-RPC id into the string key used by the pending-call registry.
///
/// Numbers and strings are accepted; `7` and `"7"` map to the same key.
pub fn request_id_key(id: &Value) -> Option<String> {
    match id {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// A JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct McpError {
    /// Error code (JSON-RPC defined or MCP-specific)
    pub code: i64,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl McpError {
    /// Create a new error
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Parse an error object leniently
    ///
    /// Remote servers are not always strict about the error shape; a bare
    /// string or a missing message still yields something reportable.
    pub fn from_value(value: &Value) -> Self {
        if let Ok(error) = serde_json::from_value::<McpError>(value.clone()) {
            return error;
        }
        match value {
            Value::String(message) => Self::internal_error(message.clone()),
            Value::Object(map) => Self {
                code: map.get("code").and_then(Value::as_i64).unwrap_or(-32603),
                message: map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string(),
                data: map.get("data").cloned(),
            },
            other => Self::internal_error(other.to_string()),
        }
    }

    /// Invalid params (-32602): Invalid method parameter(s)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }

    /// Internal error (-32603): Internal JSON-RPC error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(-32603, message)
    }
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[Error {}] {}", self.code, self.message)
    }
}

impl std::error::Error for McpError {}

/// MCP method identifiers used by this client
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum McpMethod {
    /// Capability negotiation (first handshake step)
    Initialize,

    /// Handshake acknowledgement (second handshake step)
    InitializedNotification,

    /// Call a specific tool
    ToolsCall,
}

impl McpMethod {
    /// Convert to string for JSON-RPC method field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::InitializedNotification => "notifications/initialized",
            Self::ToolsCall => "tools/call",
        }
    }
}

/// Initialization parameters
///
/// Sent during the initialize handshake to negotiate capabilities.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitializeParams {
    /// Client protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,

    /// Client capabilities
    pub capabilities: ClientCapabilities,

    /// Client information
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

impl InitializeParams {
    /// Parameters announcing every capability the client supports
    pub fn new(protocol_version: impl Into<String>, client_info: ClientInfo) -> Self {
        Self {
            protocol_version: protocol_version.into(),
            capabilities: ClientCapabilities::default(),
            client_info,
        }
    }
}

/// Client capabilities advertised during initialization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientCapabilities {
    /// Sampling capability
    pub sampling: Value,

    /// Elicitation capability
    pub elicitation: Value,

    /// Roots capability
    pub roots: RootsCapability,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            sampling: Value::Object(Default::default()),
            elicitation: Value::Object(Default::default()),
            roots: RootsCapability { list_changed: true },
        }
    }
}

/// Roots capability flags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootsCapability {
    /// Whether the client emits `roots/list_changed`
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Client identification information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client name
    pub name: String,

    /// Client version
    pub version: String,
}

/// Tool call parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallParams {
    /// Name of the tool to call
    pub name: String,

    /// Tool arguments
    pub arguments: Value,

    /// Request metadata (progress tokens)
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}
