//! JSON-RPC 2.0 wire primitives and the MCP initialize handshake types.
//!
//! This module carries exactly the wire shapes the core touches: the
//! JSON-RPC envelope and the `initialize` request/response pair needed
//! to validate the handshake (§4.1, `caps well-formed` guard). Method
//! and parameter shapes for individual feature-layer operations
//! (tools/resources/prompts/...) are out of scope; the core treats
//! `params`/`result` as opaque `serde_json::Value`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Latest MCP protocol revision this crate negotiates.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";
/// Prior revision accepted as a backwards-compatibility fallback.
pub const PROTOCOL_VERSION_2025_03_26: &str = "2025-03-26";
/// Revisions the core will accept in an `initialize` response.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[LATEST_PROTOCOL_VERSION, PROTOCOL_VERSION_2025_03_26];

/// The `initialize` method name, sent once per session on `transport_up`.
pub const METHOD_INITIALIZE: &str = "initialize";
/// The `notifications/initialized` method, sent after a successful handshake.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// The `notifications/cancelled` method used for best-effort cancellation (§4.5).
pub const METHOD_CANCELLED: &str = "notifications/cancelled";

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Request id, assigned by the sender from a strictly increasing source.
    pub id: u64,
    /// The method being invoked.
    pub method: String,
    /// Opaque request parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Builds a request frame with the fixed `"2.0"` envelope.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response: exactly one of `result` / `error` is present
/// on the wire, though both fields are modeled as `Option` to tolerate a
/// malformed peer (handled by the decode path, not this type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// Echoes the request id this response correlates with.
    pub id: serde_json::Value,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    /// Numeric error code. Standard codes are preserved verbatim.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for JsonRpcErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// A JSON-RPC 2.0 notification: a request with no `id`, expecting no reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version identifier; always `"2.0"`.
    pub jsonrpc: String,
    /// The notification method name.
    pub method: String,
    /// Optional notification parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Builds a notification frame with the fixed `"2.0"` envelope.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }

    /// Builds the best-effort `notifications/cancelled` notification sent
    /// when a per-request timer fires (§4.5).
    pub fn cancelled(request_id: u64) -> Self {
        Self::new(
            METHOD_CANCELLED,
            Some(serde_json::json!({ "requestId": request_id })),
        )
    }
}

/// Classification of a decoded inbound frame, per §4.4 step 3.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Has `id` and one of `result`/`error`: a response to a pending request.
    Response(JsonRpcResponse),
    /// Has `method`, no `id`: a fire-and-forget notification.
    Notification(JsonRpcNotification),
    /// Has `method` and `id`: a server-initiated request expecting a reply.
    ServerRequest(JsonRpcRequest),
}

/// Classifies a decoded JSON value into one of the three inbound shapes.
///
/// Returns `None` if the value has neither `method` nor a
/// response-shaped `id`/`result`/`error` combination; the caller treats
/// this as a decode failure (log at warn, re-arm, continue).
pub fn classify(value: &serde_json::Value) -> Option<InboundMessage> {
    let obj = value.as_object()?;
    let has_id = obj.contains_key("id");
    let has_method = obj.contains_key("method");
    let has_result_or_error = obj.contains_key("result") || obj.contains_key("error");

    if has_id && has_method {
        serde_json::from_value(value.clone())
            .ok()
            .map(InboundMessage::ServerRequest)
    } else if has_id && has_result_or_error {
        serde_json::from_value(value.clone())
            .ok()
            .map(InboundMessage::Response)
    } else if has_method {
        serde_json::from_value(value.clone())
            .ok()
            .map(InboundMessage::Notification)
    } else {
        None
    }
}

/// Identifies a client or server implementation by name and version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Implementation {
    /// Short name of the implementation.
    pub name: String,
    /// Semantic version string.
    pub version: String,
    /// Optional human-readable description (new in `2025-11-25`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The full set of capabilities a client advertises to a server.
///
/// The core only ever sends an empty or caller-supplied value; it does
/// not interpret these fields itself (that is a feature-layer concern).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// LLM sampling capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<serde_json::Value>,
    /// Filesystem root capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<serde_json::Value>,
}

/// The full set of capabilities a server advertises to a client.
///
/// Treated as opaque by the core beyond the well-formedness check
/// performed during the `initializing → ready` transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    /// Experimental capability extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<serde_json::Value>,
    /// Remaining capability fields, preserved verbatim for feature layers.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Parameters sent by the client in the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// The protocol version the client wishes to use.
    pub protocol_version: String,
    /// Capabilities advertised by this client.
    pub capabilities: ClientCapabilities,
    /// Information identifying this client implementation.
    pub client_info: Implementation,
}

/// Response returned by the server to an `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// The protocol version the server has selected for this session.
    pub protocol_version: String,
    /// Capabilities advertised by this server.
    pub capabilities: ServerCapabilities,
    /// Information identifying this server implementation.
    pub server_info: Implementation,
    /// Optional human-readable instructions for the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A malformed capabilities payload fails the `caps well-formed` guard
/// in the `initializing → ready` transition: an unsupported protocol
/// version.
pub fn validate_init_response(resp: &InitializeResponse) -> Result<(), String> {
    if !SUPPORTED_PROTOCOL_VERSIONS.contains(&resp.protocol_version.as_str()) {
        return Err(format!(
            "unsupported protocol version: expected one of {:?}, got {}",
            SUPPORTED_PROTOCOL_VERSIONS, resp.protocol_version
        ));
    }
    Ok(())
}
