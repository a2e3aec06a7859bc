//! Streamable HTTP server transport.
//!
//! One endpoint (default `/mcp`) accepts POST, GET, and DELETE:
//!
//! - POST: an MCP request opens an SSE stream that carries related server
//!   frames and the final response (always-stream invariant); notifications
//!   and responses get `202 Accepted`
//! - GET: opens a long-lived server stream for server-initiated traffic
//! - DELETE: terminates the session
//!
//! Sessions are minted exclusively by a successful `initialize` POST. The
//! `Mcp-Session-Id` cookie is a 128-bit random value and is required on
//! every non-initialize request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::http::{PROTOCOL_VERSION_HEADER, SESSION_HEADER, SSE_KEEP_ALIVE};
use crate::config::HttpServerConfig;
use crate::error::{TransportError, TransportResult};
use crate::peers::PeerId;
use crate::protocol::jsonrpc::{classify, frame_id, FrameKind};
use crate::transport::streamable::streams::{StreamHandle, StreamManager};
use crate::transport::{PeerMessage, Transport, TransportContext};

#[derive(Default)]
struct SessionMap {
    by_session: HashMap<String, String>,
    by_client: HashMap<String, String>,
}

impl SessionMap {
    /// Mint a fresh client-id/session-id pair.
    fn create(&mut self) -> (String, String) {
        let client_id = format!("client-{}", uuid::Uuid::new_v4());
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        self.by_session.insert(session_id.clone(), client_id.clone());
        self.by_client.insert(client_id.clone(), session_id.clone());
        (client_id, session_id)
    }

    fn client_for(&self, session_id: &str) -> Option<String> {
        self.by_session.get(session_id).cloned()
    }

    fn session_for(&self, client_id: &str) -> Option<String> {
        self.by_client.get(client_id).cloned()
    }

    /// Remove a session mapping. Returns the client id if it existed.
    fn terminate(&mut self, session_id: &str) -> Option<String> {
        let client_id = self.by_session.remove(session_id)?;
        self.by_client.remove(&client_id);
        Some(client_id)
    }
}

struct HttpServerState {
    config: HttpServerConfig,
    sessions: Mutex<SessionMap>,
    streams: StreamManager,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<PeerMessage>>>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
    open: AtomicBool,
    shutdown: Notify,
}

impl HttpServerState {
    fn enqueue(&self, client_id: &str, payload: Value) {
        let sender = self.queue_tx.lock().expect("queue sender lock poisoned").clone();
        if let Some(sender) = sender {
            let _ = sender.send(PeerMessage::new(PeerId::from(client_id), payload));
        }
    }
}

/// Server side of the Streamable HTTP transport.
pub struct StreamableHttpServerTransport {
    state: Arc<HttpServerState>,
}

impl StreamableHttpServerTransport {
    #[must_use]
    pub fn new(config: HttpServerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(HttpServerState {
                config,
                sessions: Mutex::new(SessionMap::default()),
                streams: StreamManager::new(),
                queue_tx: Mutex::new(Some(tx)),
                queue_rx: tokio::sync::Mutex::new(rx),
                open: AtomicBool::new(true),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Build the axum router for the MCP endpoint. Useful for mounting into
    /// a larger application or driving in tests.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &self.state.config.endpoint_path,
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Bind and serve until [`Transport::close`] is called.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind or the server fails.
    pub async fn serve(&self) -> anyhow::Result<()> {
        let router = self.router();
        let addr: SocketAddr =
            format!("{}:{}", self.state.config.host, self.state.config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %addr, path = %self.state.config.endpoint_path, "HTTP server listening");

        let state = Arc::clone(&self.state);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { state.shutdown.notified().await })
            .await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }

    /// The session id currently bound to a client, if any.
    #[must_use]
    pub fn session_for_client(&self, client_id: &str) -> Option<String> {
        self.state.sessions.lock().expect("session map lock poisoned").session_for(client_id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.sessions.lock().expect("session map lock poisoned").by_session.len()
    }
}

// ================================
// Validation helpers
// ================================

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

/// Validate `MCP-Protocol-Version` and `Origin`. Applies to every method.
fn validate_common_headers(state: &HttpServerState, headers: &HeaderMap) -> Result<(), Response> {
    let expected = &state.config.protocol_version;
    match headers.get(PROTOCOL_VERSION_HEADER).and_then(|v| v.to_str().ok()) {
        None => {
            return Err(bad_request(format!(
                "Missing {PROTOCOL_VERSION_HEADER} header, expected: {expected}"
            )));
        }
        Some(version) if version != expected => {
            return Err(bad_request(format!(
                "Invalid {PROTOCOL_VERSION_HEADER}: {version}, expected: {expected}"
            )));
        }
        Some(_) => {}
    }

    let origin = headers.get("Origin").and_then(|v| v.to_str().ok());
    if !state.config.origin_policy.accepts(origin) {
        tracing::warn!(origin = ?origin, "Rejected Origin header");
        return Err(bad_request("Invalid Origin header"));
    }

    Ok(())
}

fn accept_header(headers: &HeaderMap) -> &str {
    headers.get("Accept").and_then(|v| v.to_str().ok()).unwrap_or("")
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn standard_headers(response: &mut Response, session_id: &str, protocol_version: &str) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        headers.insert(SESSION_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(protocol_version) {
        headers.insert(PROTOCOL_VERSION_HEADER, value);
    }
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
}

fn sse_response(state: &HttpServerState, session_id: &str, handle: StreamHandle) -> Response {
    let mut response = Sse::new(handle.into_event_stream())
        .keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE))
        .into_response();
    standard_headers(&mut response, session_id, &state.config.protocol_version);
    response
}

// ================================
// HTTP handlers
// ================================

async fn handle_post(
    State(state): State<Arc<HttpServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = validate_common_headers(&state, &headers) {
        return response;
    }

    let accept = accept_header(&headers);
    if !accept.contains("application/json") || !accept.contains("text/event-stream") {
        return bad_request(format!(
            "Invalid Accept header, expected: application/json, text/event-stream (got: {accept})"
        ));
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return bad_request(format!("Invalid JSON: {e}")),
    };
    if !payload.is_object() {
        return bad_request("Invalid JSON: expected an object");
    }

    let kind = classify(&payload);
    if kind == FrameKind::Invalid {
        return bad_request(format!("Invalid JSON-RPC message: {payload}"));
    }

    let is_initialize = kind == FrameKind::Request
        && payload.get("method").and_then(Value::as_str) == Some("initialize");
    let session_id = session_header(&headers).map(str::to_string);

    let (client_id, session_id) = if is_initialize {
        // Initialize mints the session; carrying one in is an error.
        if session_id.is_some() {
            return bad_request("Initialize request must not include a session ID");
        }
        let pair = state.sessions.lock().expect("session map lock poisoned").create();
        tracing::info!(client = %pair.0, "Created session for new client");
        pair
    } else {
        let Some(session_id) = session_id else {
            return bad_request(format!("Missing {SESSION_HEADER} header"));
        };
        let client_id = state
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .client_for(&session_id);
        match client_id {
            Some(client_id) => (client_id, session_id),
            None => {
                return (StatusCode::NOT_FOUND, "Invalid or expired Mcp-Session-Id")
                    .into_response();
            }
        }
    };

    // Hand the frame to the session layer before answering.
    state.enqueue(&client_id, payload.clone());

    if kind == FrameKind::Request {
        // Every MCP request gets an SSE stream, however simple the reply.
        let Some(request_id) = frame_id(&payload) else {
            return bad_request("Request frame has no usable id");
        };
        let handle = state.streams.create_request_stream(&client_id, &request_id);
        sse_response(&state, &session_id, handle)
    } else {
        let mut response = StatusCode::ACCEPTED.into_response();
        standard_headers(&mut response, &session_id, &state.config.protocol_version);
        response
    }
}

async fn handle_get(State(state): State<Arc<HttpServerState>>, headers: HeaderMap) -> Response {
    if let Err(response) = validate_common_headers(&state, &headers) {
        return response;
    }

    if !accept_header(&headers).contains("text/event-stream") {
        return bad_request("Invalid Accept header, expected: text/event-stream");
    }

    let Some(session_id) = session_header(&headers) else {
        return bad_request(format!("Missing {SESSION_HEADER} header"));
    };
    let client_id =
        state.sessions.lock().expect("session map lock poisoned").client_for(session_id);
    let Some(client_id) = client_id else {
        return (StatusCode::NOT_FOUND, "Invalid or expired Mcp-Session-Id").into_response();
    };

    let handle = state.streams.create_server_stream(&client_id);
    tracing::debug!(client = %client_id, stream = %handle.stream_id(), "Opened server stream");
    sse_response(&state, session_id, handle)
}

async fn handle_delete(State(state): State<Arc<HttpServerState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return bad_request(format!("Missing {SESSION_HEADER} header"));
    };

    let client_id =
        state.sessions.lock().expect("session map lock poisoned").terminate(session_id);
    match client_id {
        Some(client_id) => {
            state.streams.close_client_streams(&client_id);
            tracing::info!(client = %client_id, "Session terminated");
            StatusCode::OK.into_response()
        }
        None => (StatusCode::NOT_FOUND, "Session not found").into_response(),
    }
}

// ================================
// Transport interface
// ================================

#[async_trait]
impl Transport for StreamableHttpServerTransport {
    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    async fn send(&self, peer: &PeerId, frame: Value, ctx: TransportContext) -> TransportResult<()> {
        let connected = self
            .state
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .session_for(peer.as_str())
            .is_some();
        if !connected {
            return Err(TransportError::unknown_peer(peer.to_string()));
        }

        if self.state.streams.send(peer.as_str(), &frame, ctx.originating_request_id.as_ref()) {
            Ok(())
        } else {
            Err(TransportError::NoActiveStream { client: peer.to_string() })
        }
    }

    async fn recv(&self) -> Option<PeerMessage> {
        self.state.queue_rx.lock().await.recv().await
    }

    async fn disconnect(&self, peer: &PeerId) -> TransportResult<()> {
        let session_id = self
            .state
            .sessions
            .lock()
            .expect("session map lock poisoned")
            .session_for(peer.as_str());
        if let Some(session_id) = session_id {
            self.state.sessions.lock().expect("session map lock poisoned").terminate(&session_id);
        }
        self.state.streams.close_client_streams(peer.as_str());
        Ok(())
    }

    async fn close(&self) {
        if self.state.open.swap(false, Ordering::SeqCst) {
            self.state.shutdown.notify_waiters();
            {
                let mut sessions =
                    self.state.sessions.lock().expect("session map lock poisoned");
                sessions.by_session.clear();
                sessions.by_client.clear();
            }
            self.state.streams.close_all();
            self.state.queue_tx.lock().expect("queue sender lock poisoned").take();
        }
    }
}

impl std::fmt::Debug for StreamableHttpServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpServerTransport")
            .field("open", &self.is_open())
            .field("sessions", &self.session_count())
            .finish()
    }
}
