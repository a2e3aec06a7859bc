//! Tests for JSON-RPC framing, classification, and typed message parsing.

use duplex_mcp::protocol::common::PingParams;
use duplex_mcp::protocol::initialization::{ClientCapabilities, Implementation, InitializeParams};
use duplex_mcp::protocol::jsonrpc::{
    classify, FrameKind, JsonRpcResponse, RequestId, RpcError, INTERNAL_ERROR, INVALID_PARAMS,
    METHOD_NOT_FOUND,
};
use duplex_mcp::protocol::meta::{Meta, ProgressToken};
use duplex_mcp::protocol::requests::{methods, Notification, ProtocolResult, Request};
use duplex_mcp::protocol::resources::ReadResourceParams;
use duplex_mcp::protocol::tools::{CallToolParams, ListToolsParams};
use proptest::prelude::*;
use serde_json::json;

// =============================================================================
// Classifier
// =============================================================================

#[test]
fn test_classifier_rules() {
    // Request: method plus a non-null id.
    assert_eq!(classify(&json!({"jsonrpc": "2.0", "id": "a", "method": "ping"})), FrameKind::Request);
    assert_eq!(classify(&json!({"jsonrpc": "2.0", "id": 0, "method": "ping"})), FrameKind::Request);

    // Notification: method and no id at all.
    assert_eq!(classify(&json!({"jsonrpc": "2.0", "method": "notifications/progress"})), FrameKind::Notification);

    // Response: id plus exactly one of result or error.
    assert_eq!(classify(&json!({"id": 1, "result": {"ok": true}})), FrameKind::Response);
    assert_eq!(
        classify(&json!({"id": 1, "error": {"code": -32601, "message": "x"}})),
        FrameKind::Response
    );

    // Violations.
    assert_eq!(classify(&json!({"id": 1})), FrameKind::Invalid);
    assert_eq!(classify(&json!({"id": 1, "result": {}, "error": {}})), FrameKind::Invalid);
    assert_eq!(classify(&json!({"id": null, "method": "ping"})), FrameKind::Invalid);
    assert_eq!(classify(&json!({"id": 1.5, "method": "ping"})), FrameKind::Invalid);
    assert_eq!(classify(&json!("not an object")), FrameKind::Invalid);
    assert_eq!(classify(&json!(["a", "b"])), FrameKind::Invalid);
}

// =============================================================================
// Request wire round trips
// =============================================================================

#[test]
fn test_every_request_variant_round_trips() {
    let requests = vec![
        Request::Initialize(InitializeParams {
            protocol_version: "2025-03-26".to_string(),
            client_info: Implementation::new("c", "1.0"),
            capabilities: ClientCapabilities { sampling: true, ..Default::default() },
            meta: None,
        }),
        Request::Ping(PingParams::default()),
        Request::ListTools(ListToolsParams { cursor: Some("p2".to_string()), meta: None }),
        Request::CallTool(CallToolParams {
            name: "echo".to_string(),
            arguments: Some(json!({"text": "hi"})),
            meta: Some(Meta::with_token("t-1")),
        }),
        Request::ReadResource(ReadResourceParams { uri: "file:///x".to_string(), meta: None }),
        Request::Experimental {
            method: "vendor/thing".to_string(),
            params: Some(json!({"k": 1})),
        },
    ];

    for request in requests {
        let frame = request.to_wire(RequestId::from("id-1"));
        let value = frame.to_value();
        assert_eq!(value["jsonrpc"], json!("2.0"));
        assert_eq!(classify(&value), FrameKind::Request);

        let parsed = Request::parse(
            value["method"].as_str().unwrap(),
            value.get("params"),
        )
        .unwrap();
        assert_eq!(parsed, request, "round trip failed for {}", request.method());
    }
}

#[test]
fn test_progress_token_rides_params_meta() {
    let request = Request::CallTool(CallToolParams {
        name: "slow".to_string(),
        arguments: None,
        meta: Some(Meta::with_token(ProgressToken::from(42))),
    });
    let value = request.to_wire(RequestId::from(1)).to_value();
    assert_eq!(value["params"]["_meta"]["progressToken"], json!(42));
}

#[test]
fn test_app_metadata_cannot_clobber_progress_token() {
    let mut extra = serde_json::Map::new();
    extra.insert("progressToken".to_string(), json!("hijack"));
    extra.insert("requestSource".to_string(), json!("test"));

    let mut meta = Meta::with_extra(extra);
    meta.progress_token = Some(ProgressToken::from("legit"));

    let request = Request::Ping(PingParams { meta: Some(meta) });
    let value = request.to_wire(RequestId::from(1)).to_value();
    assert_eq!(value["params"]["_meta"]["progressToken"], json!("legit"));
    assert_eq!(value["params"]["_meta"]["requestSource"], json!("test"));
}

// =============================================================================
// Typed parse failures
// =============================================================================

#[test]
fn test_invalid_params_carries_diagnostics() {
    let err = Request::parse(methods::RESOURCES_READ, Some(&json!({"nope": true}))).unwrap_err();
    assert_eq!(err.code, INVALID_PARAMS);
    let data = err.data.unwrap();
    assert_eq!(data["method"], json!(methods::RESOURCES_READ));
    assert_eq!(data["params"], json!({"nope": true}));
}

#[test]
fn test_unknown_method_lands_in_experimental() {
    let request = Request::parse("x/unknown", None).unwrap();
    assert!(matches!(request, Request::Experimental { .. }));
}

#[test]
fn test_unknown_notification_lands_in_experimental() {
    let notification = Notification::parse("notifications/custom", Some(&json!({"a": 1}))).unwrap();
    assert!(matches!(notification, Notification::Experimental { .. }));
    assert_eq!(notification.method(), "notifications/custom");
}

// =============================================================================
// Response parsing in request context
// =============================================================================

#[test]
fn test_response_parses_against_expected_type() {
    let request = Request::ListTools(ListToolsParams::default());
    let response = JsonRpcResponse::new(RequestId::from("r"), json!({"tools": []})).to_value();

    let result = request.parse_result(response["result"].clone()).unwrap();
    assert!(matches!(result, ProtocolResult::ListTools(_)));
}

#[test]
fn test_malformed_response_yields_internal_error_with_data() {
    let request = Request::ReadResource(ReadResourceParams { uri: "u".to_string(), meta: None });
    let err = request.parse_result(json!({"contents": 5})).unwrap_err();
    assert_eq!(err.code, INTERNAL_ERROR);
    assert!(err.data.unwrap()["error"].as_str().is_some());
}

#[test]
fn test_error_code_constants() {
    assert_eq!(METHOD_NOT_FOUND, -32601);
    assert_eq!(INVALID_PARAMS, -32602);
    assert_eq!(INTERNAL_ERROR, -32603);
    assert_eq!(duplex_mcp::protocol::jsonrpc::PROTOCOL_VERSION_MISMATCH, -32001);
}

#[test]
fn test_rpc_error_round_trip() {
    let error = RpcError::method_not_found("No handler for method: x")
        .with_data(json!({"method": "x"}));
    let value = serde_json::to_value(&error).unwrap();
    let parsed: RpcError = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, error);
}

// =============================================================================
// Property tests
// =============================================================================

proptest! {
    #[test]
    fn prop_request_id_round_trips(id in prop_oneof![
        any::<i64>().prop_map(RequestId::from),
        ".{0,40}".prop_map(|s| RequestId::from(s)),
    ]) {
        let value = serde_json::to_value(&id).unwrap();
        let parsed: RequestId = serde_json::from_value(value).unwrap();
        prop_assert_eq!(parsed, id);
    }

    #[test]
    fn prop_call_tool_round_trips(name in "[a-z_]{1,20}", text in ".{0,60}") {
        let request = Request::CallTool(CallToolParams {
            name,
            arguments: Some(json!({"text": text})),
            meta: None,
        });
        let frame = request.to_wire(RequestId::from("p"));
        let value = frame.to_value();
        let parsed = Request::parse(value["method"].as_str().unwrap(), value.get("params")).unwrap();
        prop_assert_eq!(parsed, request);
    }
}
