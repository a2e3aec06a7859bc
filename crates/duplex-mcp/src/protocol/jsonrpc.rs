//! JSON-RPC 2.0 framing and classification.
//!
//! Every MCP message is one of three frame shapes:
//! - request: `method` plus a non-null `id`
//! - notification: `method` and no `id`
//! - response: `id` plus exactly one of `result` or `error`
//!
//! [`classify`] applies these rules to a raw decoded value. Batch arrays are
//! accepted on input (callers iterate the elements) but never emitted.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC version constant carried on every frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;

/// The method does not exist or its capability was not advertised.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// The request parses as the method but fails shape validation.
pub const INVALID_PARAMS: i64 = -32602;

/// Handler failure, cancellation, or a malformed response.
pub const INTERNAL_ERROR: i64 = -32603;

/// The peer advertised a protocol version this side does not accept.
pub const PROTOCOL_VERSION_MISMATCH: i64 = -32001;

/// Request identifier: a string or an integer, never null.
///
/// `0` and `""` are both valid and distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Num(i64),
    /// String id.
    Str(String),
}

impl RequestId {
    /// Generate a fresh id for an outbound request.
    #[must_use]
    pub fn fresh() -> Self {
        Self::Str(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// JSON-RPC error object.
///
/// Doubles as the wire model and a Rust error so peer-reported failures can
/// flow through `?` at the session layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("RPC error {code}: {message}")]
pub struct RpcError {
    /// Error code (reserved codes in this module's constants).
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional diagnostic payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error with the given code and message.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    /// Create a method-not-found error.
    #[must_use]
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(METHOD_NOT_FOUND, message)
    }

    /// Create an invalid-params error.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    /// Create a protocol-version-mismatch error.
    #[must_use]
    pub fn version_mismatch(message: impl Into<String>) -> Self {
        Self::new(PROTOCOL_VERSION_MISMATCH, message)
    }

    /// Attach a diagnostic payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// JSON-RPC request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: Cow::Borrowed(JSONRPC_VERSION), id, method: method.into(), params }
    }

    /// Serialize to a raw wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("request frame serializes")
    }
}

/// JSON-RPC notification frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: Cow<'static, str>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self { jsonrpc: Cow::Borrowed(JSONRPC_VERSION), method: method.into(), params }
    }

    /// Serialize to a raw wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("notification frame serializes")
    }
}

/// JSON-RPC success response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    #[must_use]
    pub fn new(id: RequestId, result: Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(JSONRPC_VERSION), id, result }
    }

    /// Serialize to a raw wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("response frame serializes")
    }
}

/// JSON-RPC error response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: Cow<'static, str>,
    pub id: RequestId,
    pub error: RpcError,
}

impl JsonRpcErrorResponse {
    #[must_use]
    pub fn new(id: RequestId, error: RpcError) -> Self {
        Self { jsonrpc: Cow::Borrowed(JSONRPC_VERSION), id, error }
    }

    /// Serialize to a raw wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("error frame serializes")
    }
}

/// Result of classifying a raw decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Notification,
    Response,
    /// Not a valid JSON-RPC frame; log and skip.
    Invalid,
}

fn valid_id(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(_)) => true,
        Some(Value::Number(n)) => n.is_i64() || n.is_u64(),
        _ => false,
    }
}

/// Classify a raw decoded object as request, notification, or response.
///
/// The response rule is strict: exactly one of `result` or `error` must be
/// present. Frames violating it are [`FrameKind::Invalid`].
#[must_use]
pub fn classify(payload: &Value) -> FrameKind {
    let Some(obj) = payload.as_object() else {
        return FrameKind::Invalid;
    };

    let has_method = matches!(obj.get("method"), Some(Value::String(_)));
    let has_id = valid_id(obj.get("id"));

    if has_method {
        if has_id {
            return FrameKind::Request;
        }
        if !obj.contains_key("id") {
            return FrameKind::Notification;
        }
        return FrameKind::Invalid;
    }

    if has_id {
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");
        if has_result ^ has_error {
            return FrameKind::Response;
        }
    }

    FrameKind::Invalid
}

/// Extract the request id from a frame already classified as a request or
/// response.
#[must_use]
pub fn frame_id(payload: &Value) -> Option<RequestId> {
    serde_json::from_value(payload.get("id")?.clone()).ok()
}
