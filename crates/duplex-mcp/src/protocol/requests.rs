//! Typed request, notification, and result variants.
//!
//! Parsing chooses a variant from the `method` string via a static match.
//! Each request variant knows which result variant its response decodes to;
//! [`Request::parse_result`] applies that knowledge when a correlated
//! response arrives. Methods outside the schema land in the open-set
//! `Experimental` variants and round-trip untouched.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::common::{CancelledParams, PingParams, ProgressParams};
use super::completion::{CompleteParams, CompleteResult};
use super::elicitation::{ElicitParams, ElicitResult};
use super::initialization::{InitializeParams, InitializeResult};
use super::jsonrpc::{JsonRpcNotification, JsonRpcRequest, RequestId, RpcError};
use super::logging::{LoggingMessageParams, SetLevelParams};
use super::prompts::{GetPromptParams, GetPromptResult, ListPromptsParams, ListPromptsResult};
use super::resources::{
    ListResourceTemplatesParams, ListResourceTemplatesResult, ListResourcesParams,
    ListResourcesResult, ReadResourceParams, ReadResourceResult, ResourceUpdatedParams,
    SubscribeParams, UnsubscribeParams,
};
use super::roots::{ListRootsParams, ListRootsResult};
use super::sampling::{CreateMessageParams, CreateMessageResult};
use super::tools::{CallToolParams, CallToolResult, ListToolsParams, ListToolsResult};

/// Stable method names.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const COMPLETION_COMPLETE: &str = "completion/complete";
    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
    pub const ROOTS_LIST: &str = "roots/list";
    pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
    pub const ELICITATION_CREATE: &str = "elicitation/create";

    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const PROGRESS: &str = "notifications/progress";
    pub const MESSAGE: &str = "notifications/message";
    pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
    pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";
    pub const RESOURCES_UPDATED: &str = "notifications/resources/updated";
    pub const PROMPTS_LIST_CHANGED: &str = "notifications/prompts/list_changed";
    pub const ROOTS_LIST_CHANGED: &str = "notifications/roots/list_changed";
}

/// The outcome of a request: a typed result or the peer's error object.
pub type RpcOutcome = Result<ProtocolResult, RpcError>;

fn parse_params<T: DeserializeOwned>(method: &str, params: Option<&Value>) -> Result<T, RpcError> {
    let value = params.cloned().unwrap_or_else(|| Value::Object(Map::new()));
    serde_json::from_value(value.clone()).map_err(|e| {
        RpcError::invalid_params(format!("Invalid params for method: {method}"))
            .with_data(json!({"method": method, "params": value, "error": e.to_string()}))
    })
}

fn params_value<T: Serialize>(params: &T) -> Option<Value> {
    let value = serde_json::to_value(params).expect("params serialize");
    match &value {
        Value::Object(map) if map.is_empty() => None,
        _ => Some(value),
    }
}

/// A typed MCP request. Immutable once sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Initialize(InitializeParams),
    Ping(PingParams),
    ListTools(ListToolsParams),
    CallTool(CallToolParams),
    ListResources(ListResourcesParams),
    ListResourceTemplates(ListResourceTemplatesParams),
    ReadResource(ReadResourceParams),
    Subscribe(SubscribeParams),
    Unsubscribe(UnsubscribeParams),
    ListPrompts(ListPromptsParams),
    GetPrompt(GetPromptParams),
    Complete(CompleteParams),
    SetLevel(SetLevelParams),
    ListRoots(ListRootsParams),
    CreateMessage(CreateMessageParams),
    Elicit(ElicitParams),
    /// Open set for methods outside the schema.
    Experimental { method: String, params: Option<Value> },
}

impl Request {
    /// The wire method name of this request.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Initialize(_) => methods::INITIALIZE,
            Self::Ping(_) => methods::PING,
            Self::ListTools(_) => methods::TOOLS_LIST,
            Self::CallTool(_) => methods::TOOLS_CALL,
            Self::ListResources(_) => methods::RESOURCES_LIST,
            Self::ListResourceTemplates(_) => methods::RESOURCES_TEMPLATES_LIST,
            Self::ReadResource(_) => methods::RESOURCES_READ,
            Self::Subscribe(_) => methods::RESOURCES_SUBSCRIBE,
            Self::Unsubscribe(_) => methods::RESOURCES_UNSUBSCRIBE,
            Self::ListPrompts(_) => methods::PROMPTS_LIST,
            Self::GetPrompt(_) => methods::PROMPTS_GET,
            Self::Complete(_) => methods::COMPLETION_COMPLETE,
            Self::SetLevel(_) => methods::LOGGING_SET_LEVEL,
            Self::ListRoots(_) => methods::ROOTS_LIST,
            Self::CreateMessage(_) => methods::SAMPLING_CREATE_MESSAGE,
            Self::Elicit(_) => methods::ELICITATION_CREATE,
            Self::Experimental { method, .. } => method,
        }
    }

    /// True only for the `initialize` handshake request, which is exempt
    /// from timeout cancellation and the initialized gate.
    #[must_use]
    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Initialize(_))
    }

    /// True for the requests allowed before a peer is initialized.
    #[must_use]
    pub fn allowed_before_initialized(&self) -> bool {
        matches!(self, Self::Initialize(_) | Self::Ping(_))
    }

    /// Parse a typed request from its method name and raw params.
    ///
    /// Unknown methods land in [`Request::Experimental`]; shape failures
    /// yield INVALID_PARAMS with the method, raw params, and decode error
    /// attached as data.
    pub fn parse(method: &str, params: Option<&Value>) -> Result<Self, RpcError> {
        Ok(match method {
            methods::INITIALIZE => Self::Initialize(parse_params(method, params)?),
            methods::PING => Self::Ping(parse_params(method, params)?),
            methods::TOOLS_LIST => Self::ListTools(parse_params(method, params)?),
            methods::TOOLS_CALL => Self::CallTool(parse_params(method, params)?),
            methods::RESOURCES_LIST => Self::ListResources(parse_params(method, params)?),
            methods::RESOURCES_TEMPLATES_LIST => {
                Self::ListResourceTemplates(parse_params(method, params)?)
            }
            methods::RESOURCES_READ => Self::ReadResource(parse_params(method, params)?),
            methods::RESOURCES_SUBSCRIBE => Self::Subscribe(parse_params(method, params)?),
            methods::RESOURCES_UNSUBSCRIBE => Self::Unsubscribe(parse_params(method, params)?),
            methods::PROMPTS_LIST => Self::ListPrompts(parse_params(method, params)?),
            methods::PROMPTS_GET => Self::GetPrompt(parse_params(method, params)?),
            methods::COMPLETION_COMPLETE => Self::Complete(parse_params(method, params)?),
            methods::LOGGING_SET_LEVEL => Self::SetLevel(parse_params(method, params)?),
            methods::ROOTS_LIST => Self::ListRoots(parse_params(method, params)?),
            methods::SAMPLING_CREATE_MESSAGE => Self::CreateMessage(parse_params(method, params)?),
            methods::ELICITATION_CREATE => Self::Elicit(parse_params(method, params)?),
            _ => Self::Experimental { method: method.to_string(), params: params.cloned() },
        })
    }

    /// Frame this request for the wire under the given id.
    #[must_use]
    pub fn to_wire(&self, id: RequestId) -> JsonRpcRequest {
        JsonRpcRequest::new(id, self.method().to_string(), self.wire_params())
    }

    fn wire_params(&self) -> Option<Value> {
        match self {
            Self::Initialize(p) => params_value(p),
            Self::Ping(p) => params_value(p),
            Self::ListTools(p) => params_value(p),
            Self::CallTool(p) => params_value(p),
            Self::ListResources(p) => params_value(p),
            Self::ListResourceTemplates(p) => params_value(p),
            Self::ReadResource(p) => params_value(p),
            Self::Subscribe(p) => params_value(p),
            Self::Unsubscribe(p) => params_value(p),
            Self::ListPrompts(p) => params_value(p),
            Self::GetPrompt(p) => params_value(p),
            Self::Complete(p) => params_value(p),
            Self::SetLevel(p) => params_value(p),
            Self::ListRoots(p) => params_value(p),
            Self::CreateMessage(p) => params_value(p),
            Self::Elicit(p) => params_value(p),
            Self::Experimental { params, .. } => params.clone(),
        }
    }

    /// Parse a success payload in the context of this (original) request.
    ///
    /// The variant determines which result shape to decode. A malformed
    /// payload yields INTERNAL_ERROR with the method, payload, and decode
    /// error attached as data.
    pub fn parse_result(&self, payload: Value) -> Result<ProtocolResult, RpcError> {
        fn typed<T: DeserializeOwned>(method: &str, payload: Value) -> Result<T, RpcError> {
            serde_json::from_value(payload.clone()).map_err(|e| {
                RpcError::internal(format!("Malformed response for method: {method}"))
                    .with_data(json!({"method": method, "result": payload, "error": e.to_string()}))
            })
        }

        let method = self.method();
        Ok(match self {
            Self::Initialize(_) => ProtocolResult::Initialize(typed(method, payload)?),
            Self::Ping(_) | Self::Subscribe(_) | Self::Unsubscribe(_) | Self::SetLevel(_) => {
                ProtocolResult::Empty
            }
            Self::ListTools(_) => ProtocolResult::ListTools(typed(method, payload)?),
            Self::CallTool(_) => ProtocolResult::CallTool(typed(method, payload)?),
            Self::ListResources(_) => ProtocolResult::ListResources(typed(method, payload)?),
            Self::ListResourceTemplates(_) => {
                ProtocolResult::ListResourceTemplates(typed(method, payload)?)
            }
            Self::ReadResource(_) => ProtocolResult::ReadResource(typed(method, payload)?),
            Self::ListPrompts(_) => ProtocolResult::ListPrompts(typed(method, payload)?),
            Self::GetPrompt(_) => ProtocolResult::GetPrompt(typed(method, payload)?),
            Self::Complete(_) => ProtocolResult::Complete(typed(method, payload)?),
            Self::ListRoots(_) => ProtocolResult::ListRoots(typed(method, payload)?),
            Self::CreateMessage(_) => ProtocolResult::CreateMessage(typed(method, payload)?),
            Self::Elicit(_) => ProtocolResult::Elicit(typed(method, payload)?),
            Self::Experimental { .. } => ProtocolResult::Experimental(payload),
        })
    }
}

/// A typed MCP notification. Never expects a reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Initialized,
    Cancelled(CancelledParams),
    Progress(ProgressParams),
    Message(LoggingMessageParams),
    ToolListChanged,
    ResourceListChanged,
    ResourceUpdated(ResourceUpdatedParams),
    PromptListChanged,
    RootsListChanged,
    /// Open set for methods outside the schema.
    Experimental { method: String, params: Option<Value> },
}

impl Notification {
    /// The wire method name of this notification.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Initialized => methods::INITIALIZED,
            Self::Cancelled(_) => methods::CANCELLED,
            Self::Progress(_) => methods::PROGRESS,
            Self::Message(_) => methods::MESSAGE,
            Self::ToolListChanged => methods::TOOLS_LIST_CHANGED,
            Self::ResourceListChanged => methods::RESOURCES_LIST_CHANGED,
            Self::ResourceUpdated(_) => methods::RESOURCES_UPDATED,
            Self::PromptListChanged => methods::PROMPTS_LIST_CHANGED,
            Self::RootsListChanged => methods::ROOTS_LIST_CHANGED,
            Self::Experimental { method, .. } => method,
        }
    }

    /// Parse a typed notification from its method name and raw params.
    pub fn parse(method: &str, params: Option<&Value>) -> Result<Self, RpcError> {
        Ok(match method {
            methods::INITIALIZED => Self::Initialized,
            methods::CANCELLED => Self::Cancelled(parse_params(method, params)?),
            methods::PROGRESS => Self::Progress(parse_params(method, params)?),
            methods::MESSAGE => Self::Message(parse_params(method, params)?),
            methods::TOOLS_LIST_CHANGED => Self::ToolListChanged,
            methods::RESOURCES_LIST_CHANGED => Self::ResourceListChanged,
            methods::RESOURCES_UPDATED => Self::ResourceUpdated(parse_params(method, params)?),
            methods::PROMPTS_LIST_CHANGED => Self::PromptListChanged,
            methods::ROOTS_LIST_CHANGED => Self::RootsListChanged,
            _ => Self::Experimental { method: method.to_string(), params: params.cloned() },
        })
    }

    /// Frame this notification for the wire.
    #[must_use]
    pub fn to_wire(&self) -> JsonRpcNotification {
        let params = match self {
            Self::Initialized
            | Self::ToolListChanged
            | Self::ResourceListChanged
            | Self::PromptListChanged
            | Self::RootsListChanged => None,
            Self::Cancelled(p) => params_value(p),
            Self::Progress(p) => params_value(p),
            Self::Message(p) => params_value(p),
            Self::ResourceUpdated(p) => params_value(p),
            Self::Experimental { params, .. } => params.clone(),
        };
        JsonRpcNotification::new(self.method().to_string(), params)
    }
}

/// A typed success payload, one variant per result shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolResult {
    /// The ping reply and every fire-and-forget acknowledgement.
    Empty,
    Initialize(InitializeResult),
    ListTools(ListToolsResult),
    CallTool(CallToolResult),
    ListResources(ListResourcesResult),
    ListResourceTemplates(ListResourceTemplatesResult),
    ReadResource(ReadResourceResult),
    ListPrompts(ListPromptsResult),
    GetPrompt(GetPromptResult),
    Complete(CompleteResult),
    ListRoots(ListRootsResult),
    CreateMessage(CreateMessageResult),
    Elicit(ElicitResult),
    /// Open set for methods outside the schema.
    Experimental(Value),
}

impl ProtocolResult {
    /// Serialize to the raw `result` payload of a response frame.
    #[must_use]
    pub fn to_value(&self) -> Value {
        fn ser<T: Serialize>(value: &T) -> Value {
            serde_json::to_value(value).expect("result serializes")
        }

        match self {
            Self::Empty => json!({}),
            Self::Initialize(r) => ser(r),
            Self::ListTools(r) => ser(r),
            Self::CallTool(r) => ser(r),
            Self::ListResources(r) => ser(r),
            Self::ListResourceTemplates(r) => ser(r),
            Self::ReadResource(r) => ser(r),
            Self::ListPrompts(r) => ser(r),
            Self::GetPrompt(r) => ser(r),
            Self::Complete(r) => ser(r),
            Self::ListRoots(r) => ser(r),
            Self::CreateMessage(r) => ser(r),
            Self::Elicit(r) => ser(r),
            Self::Experimental(v) => v.clone(),
        }
    }

    /// Short label used in diagnostics when a response decodes to an
    /// unexpected variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Initialize(_) => "initialize",
            Self::ListTools(_) => "tools/list",
            Self::CallTool(_) => "tools/call",
            Self::ListResources(_) => "resources/list",
            Self::ListResourceTemplates(_) => "resources/templates/list",
            Self::ReadResource(_) => "resources/read",
            Self::ListPrompts(_) => "prompts/list",
            Self::GetPrompt(_) => "prompts/get",
            Self::Complete(_) => "completion/complete",
            Self::ListRoots(_) => "roots/list",
            Self::CreateMessage(_) => "sampling/createMessage",
            Self::Elicit(_) => "elicitation/create",
            Self::Experimental(_) => "experimental",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::jsonrpc::INVALID_PARAMS;

    #[test]
    fn test_parse_known_method() {
        let request = Request::parse(methods::TOOLS_CALL, Some(&json!({"name": "echo"}))).unwrap();
        match request {
            Request::CallTool(params) => assert_eq!(params.name, "echo"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_parse_missing_params_is_invalid_params() {
        let err = Request::parse(methods::TOOLS_CALL, None).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
        let data = err.data.unwrap();
        assert_eq!(data["method"], json!(methods::TOOLS_CALL));
        assert!(data["error"].as_str().is_some());
    }

    #[test]
    fn test_unknown_method_is_experimental() {
        let request = Request::parse("vendor/custom", Some(&json!({"x": 1}))).unwrap();
        assert_eq!(request.method(), "vendor/custom");
        assert!(matches!(request, Request::Experimental { .. }));
    }

    #[test]
    fn test_ping_omits_empty_params() {
        let frame = Request::Ping(PingParams::default()).to_wire(RequestId::from("p-1"));
        assert!(frame.params.is_none());
        assert_eq!(frame.method, "ping");
    }

    #[test]
    fn test_request_wire_round_trip() {
        let request = Request::ReadResource(ReadResourceParams {
            uri: "file:///a.txt".to_string(),
            meta: None,
        });
        let frame = request.to_wire(RequestId::from(3));
        let parsed = Request::parse(&frame.method, frame.params.as_ref()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_parse_result_by_expected_type() {
        let request = Request::ListTools(ListToolsParams::default());
        let result = request.parse_result(json!({"tools": []})).unwrap();
        assert!(matches!(result, ProtocolResult::ListTools(_)));

        let ping = Request::Ping(PingParams::default());
        assert_eq!(ping.parse_result(json!({})).unwrap(), ProtocolResult::Empty);
    }

    #[test]
    fn test_malformed_result_is_internal_error() {
        let request = Request::ListTools(ListToolsParams::default());
        let err = request.parse_result(json!({"tools": "not-a-list"})).unwrap_err();
        assert_eq!(err.code, crate::protocol::jsonrpc::INTERNAL_ERROR);
        assert!(err.data.is_some());
    }

    #[test]
    fn test_notification_round_trip() {
        let notification = Notification::Cancelled(CancelledParams::new(
            RequestId::from("r-9"),
            "Request timed out",
        ));
        let frame = notification.to_wire();
        let parsed = Notification::parse(&frame.method, frame.params.as_ref()).unwrap();
        assert_eq!(parsed, notification);
    }
}
