//! Tests for the Streamable HTTP server transport, driven through the axum
//! router without binding a socket.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use duplex_mcp::config::{HttpServerConfig, OriginPolicy};
use duplex_mcp::protocol::jsonrpc::RequestId;
use duplex_mcp::transport::streamable::StreamableHttpServerTransport;
use duplex_mcp::transport::{Transport, TransportContext};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const VERSION: &str = "2025-03-26";

fn transport() -> StreamableHttpServerTransport {
    StreamableHttpServerTransport::new(HttpServerConfig::default())
}

fn post(body: &Value, session: Option<&str>) -> HttpRequest<Body> {
    let mut builder = HttpRequest::builder()
        .method("POST")
        .uri("/mcp")
        .header("MCP-Protocol-Version", VERSION)
        .header("Accept", "application/json, text/event-stream")
        .header("Content-Type", "application/json");
    if let Some(session) = session {
        builder = builder.header("Mcp-Session-Id", session);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn initialize_body() -> Value {
    json!({
        "jsonrpc": "2.0", "id": "init-1", "method": "initialize",
        "params": {
            "protocolVersion": VERSION,
            "clientInfo": {"name": "c", "version": "1.0"},
            "capabilities": {}
        }
    })
}

/// POST initialize and return the minted session id.
async fn open_session(transport: &StreamableHttpServerTransport) -> String {
    let response = transport.router().oneshot(post(&initialize_body(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.headers()["Mcp-Session-Id"].to_str().unwrap().to_string()
}

// =============================================================================
// S6: initialize mints the session; the session gates everything else
// =============================================================================

#[tokio::test]
async fn test_initialize_assigns_session_and_streams_response() {
    let transport = transport();
    let router = transport.router();

    let response = router.clone().oneshot(post(&initialize_body(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"].to_str().unwrap().contains("text/event-stream"));
    assert_eq!(response.headers()["MCP-Protocol-Version"].to_str().unwrap(), VERSION);
    let session_id = response.headers()["Mcp-Session-Id"].to_str().unwrap().to_string();
    assert!(session_id.len() >= 32);

    // The frame reached the session layer tagged with the new client id.
    let message = tokio::time::timeout(Duration::from_secs(2), transport.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.payload["method"], json!("initialize"));
    let client = message.peer_id;
    assert_eq!(transport.session_for_client(client.as_str()).as_deref(), Some(session_id.as_str()));

    // Push the handshake reply onto the request stream; it auto-closes.
    let reply = json!({
        "jsonrpc": "2.0", "id": "init-1",
        "result": {
            "protocolVersion": VERSION,
            "capabilities": {},
            "serverInfo": {"name": "s", "version": "0.1.0"}
        }
    });
    transport
        .send(&client, reply.clone(), TransportContext::for_request(RequestId::from("init-1")))
        .await
        .unwrap();

    let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    let data_line = text.lines().find(|l| l.starts_with("data: ")).unwrap();
    let frame: Value = serde_json::from_str(&data_line["data: ".len()..]).unwrap();
    assert_eq!(frame, reply);

    // Subsequent request without the cookie: 400. With a bogus cookie: 404.
    let response =
        router.clone().oneshot(post(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = router
        .clone()
        .oneshot(post(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}), Some("bogus")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // With the real cookie: a fresh SSE stream.
    let response = router
        .oneshot(post(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}), Some(&session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"].to_str().unwrap().contains("text/event-stream"));
}

#[tokio::test]
async fn test_initialize_with_session_id_is_rejected() {
    let transport = transport();
    let response =
        transport.router().oneshot(post(&initialize_body(), Some("preexisting"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Header validation
// =============================================================================

#[tokio::test]
async fn test_missing_or_wrong_protocol_version_is_rejected() {
    let transport = transport();
    let router = transport.router();

    let request = HttpRequest::builder()
        .method("POST")
        .uri("/mcp")
        .header("Accept", "application/json, text/event-stream")
        .body(Body::from(initialize_body().to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = HttpRequest::builder()
        .method("POST")
        .uri("/mcp")
        .header("MCP-Protocol-Version", "1999-01-01")
        .header("Accept", "application/json, text/event-stream")
        .body(Body::from(initialize_body().to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_requires_both_accept_types() {
    let transport = transport();
    let request = HttpRequest::builder()
        .method("POST")
        .uri("/mcp")
        .header("MCP-Protocol-Version", VERSION)
        .header("Accept", "application/json")
        .body(Body::from(initialize_body().to_string()))
        .unwrap();
    let response = transport.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_origin_allowlist_rejects_unknown_origins() {
    let config = HttpServerConfig {
        origin_policy: OriginPolicy::Allowlist(vec!["http://localhost:3000".to_string()]),
        ..Default::default()
    };
    let transport = StreamableHttpServerTransport::new(config);
    let router = transport.router();

    let mut request = post(&initialize_body(), None);
    request.headers_mut().insert("Origin", "http://evil.example".parse().unwrap());
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut request = post(&initialize_body(), None);
    request.headers_mut().insert("Origin", "http://localhost:3000".parse().unwrap());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_bodies_are_rejected() {
    let transport = transport();
    let session = open_session(&transport).await;
    let router = transport.router();

    let mut request = post(&json!({}), Some(&session));
    *request.body_mut() = Body::from("{not json");
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Parses as JSON but is not a valid JSON-RPC frame.
    let response = router.oneshot(post(&json!({"id": 1}), Some(&session))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Notifications, GET streams, DELETE
// =============================================================================

#[tokio::test]
async fn test_notification_gets_202() {
    let transport = transport();
    let session = open_session(&transport).await;

    let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    let response = transport.router().oneshot(post(&notification, Some(&session))).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()["Mcp-Session-Id"].to_str().unwrap(), session);
}

#[tokio::test]
async fn test_get_opens_server_stream_and_routes_server_traffic() {
    let transport = transport();
    let session = open_session(&transport).await;
    let message = transport.recv().await.unwrap();
    let client = message.peer_id;

    // Without a session: 400.
    let request = HttpRequest::builder()
        .method("GET")
        .uri("/mcp")
        .header("MCP-Protocol-Version", VERSION)
        .header("Accept", "text/event-stream")
        .body(Body::empty())
        .unwrap();
    let response = transport.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // No server stream yet: server-initiated sends have nowhere to go.
    let server_request = json!({"jsonrpc": "2.0", "id": "srv-1", "method": "roots/list"});
    assert!(transport
        .send(&client, server_request.clone(), TransportContext::default())
        .await
        .is_err());

    let request = HttpRequest::builder()
        .method("GET")
        .uri("/mcp")
        .header("MCP-Protocol-Version", VERSION)
        .header("Accept", "text/event-stream")
        .header("Mcp-Session-Id", &session)
        .body(Body::empty())
        .unwrap();
    let response = transport.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"].to_str().unwrap().contains("text/event-stream"));

    // Now the same frame is deliverable and arrives on the stream.
    transport.send(&client, server_request.clone(), TransportContext::default()).await.unwrap();

    let mut body = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(text.contains("roots/list"));
}

#[tokio::test]
async fn test_delete_terminates_session() {
    let transport = transport();
    let session = open_session(&transport).await;

    let delete = |session: &str| {
        HttpRequest::builder()
            .method("DELETE")
            .uri("/mcp")
            .header("Mcp-Session-Id", session)
            .body(Body::empty())
            .unwrap()
    };

    let response = transport.router().oneshot(delete(&session)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.session_count(), 0);

    // Session is gone: a second DELETE 404s, and so does any request.
    let response = transport.router().oneshot(delete(&session)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"});
    let response = transport.router().oneshot(post(&body, Some(&session))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_request_stream_carries_interim_frames_then_closes() {
    let transport = transport();
    let session = open_session(&transport).await;
    let init = transport.recv().await.unwrap();
    let client = init.peer_id;

    let body = json!({"jsonrpc": "2.0", "id": "slow-1", "method": "tools/call",
        "params": {"name": "slow", "arguments": {}}});
    let response = transport.router().oneshot(post(&body, Some(&session))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let _request = transport.recv().await.unwrap();

    let ctx = || TransportContext::for_request(RequestId::from("slow-1"));
    let progress = json!({"jsonrpc": "2.0", "method": "notifications/progress",
        "params": {"progressToken": "t", "progress": 0.5}});
    transport.send(&client, progress, ctx()).await.unwrap();
    let reply = json!({"jsonrpc": "2.0", "id": "slow-1", "result": {"content": []}});
    transport.send(&client, reply, ctx()).await.unwrap();

    // Stream carries both frames, response last, then ends (auto-close).
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let frames: Vec<Value> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .map(|d| serde_json::from_str(d).unwrap())
        .collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["method"], json!("notifications/progress"));
    assert_eq!(frames[1]["id"], json!("slow-1"));

    // The request stream is gone after the response frame.
    let orphan = json!({"jsonrpc": "2.0", "id": "slow-1", "result": {}});
    assert!(transport.send(&client, orphan, ctx()).await.is_err());
}
