//! Streamable HTTP client transport.
//!
//! Every outbound frame is an HTTP POST to the server's MCP endpoint. The
//! server may answer with a single JSON body, an SSE stream (drained by a
//! background listener), or `202 Accepted`. An optional GET opens a
//! long-lived server stream for server-initiated traffic.
//!
//! A successful `initialize` POST may return an `Mcp-Session-Id` header;
//! the value is stored and attached to every subsequent request for that
//! server. A 404 while a session is held means the session expired: local
//! state is cleared and the caller must re-initialize.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::config::http::{
    DELETE_TIMEOUT, GET_STREAM_TIMEOUT, POST_TIMEOUT, PROTOCOL_VERSION_HEADER, SESSION_HEADER,
};
use crate::config::protocol;
use crate::error::{TransportError, TransportResult};
use crate::peers::PeerId;
use crate::transport::{PeerMessage, Transport, TransportContext};

struct ServerEndpoint {
    endpoint: Url,
    headers: HashMap<String, String>,
}

struct HttpClientInner {
    http: reqwest::Client,
    protocol_version: String,
    servers: Mutex<HashMap<PeerId, ServerEndpoint>>,
    sessions: Mutex<HashMap<PeerId, String>>,
    listeners: Mutex<HashMap<PeerId, Vec<JoinHandle<()>>>>,
    queue_tx: Mutex<Option<mpsc::UnboundedSender<PeerMessage>>>,
    queue_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
    closed: AtomicBool,
}

/// Client side of the Streamable HTTP transport, multiplexing any number of
/// servers.
pub struct StreamableHttpClientTransport {
    inner: Arc<HttpClientInner>,
}

impl Default for StreamableHttpClientTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamableHttpClientTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_protocol_version(protocol::VERSION)
    }

    #[must_use]
    pub fn with_protocol_version(version: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(GET_STREAM_TIMEOUT)
            .build()
            .expect("reqwest client builds");
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(HttpClientInner {
                http,
                protocol_version: version.into(),
                servers: Mutex::new(HashMap::new()),
                sessions: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
                queue_tx: Mutex::new(Some(tx)),
                queue_rx: tokio::sync::Mutex::new(rx),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a server endpoint with optional default headers (the
    /// `Authorization` seam for an external auth layer). No connection is
    /// made until the first send.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate id or a non-HTTP endpoint.
    pub fn add_server(
        &self,
        server_id: impl Into<PeerId>,
        endpoint: &str,
        headers: HashMap<String, String>,
    ) -> TransportResult<()> {
        let server_id = server_id.into();
        let endpoint = Url::parse(endpoint)
            .map_err(|e| TransportError::InvalidConnectionInfo(format!("invalid endpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::InvalidConnectionInfo(
                "endpoint must be an HTTP or HTTPS URL".to_string(),
            ));
        }

        let mut servers = self.inner.servers.lock().expect("server map lock poisoned");
        if servers.contains_key(&server_id) {
            return Err(TransportError::already_registered(server_id.to_string()));
        }
        tracing::debug!(server = %server_id, endpoint = %endpoint, "Registered server");
        servers.insert(server_id, ServerEndpoint { endpoint, headers });
        Ok(())
    }

    /// The session id established with a server, if any.
    #[must_use]
    pub fn session_for(&self, server_id: &PeerId) -> Option<String> {
        self.inner.sessions.lock().expect("session map lock poisoned").get(server_id).cloned()
    }

    /// Open a server-initiated message stream via GET.
    ///
    /// # Errors
    ///
    /// [`TransportError::StreamsUnsupported`] on 405 (fatal for this
    /// feature, not for the session); session expiry and transport failures
    /// otherwise.
    pub async fn start_server_stream(&self, server_id: &PeerId) -> TransportResult<()> {
        let (endpoint, mut headers) = self.inner.request_parts(server_id)?;
        headers.insert("Accept".to_string(), "text/event-stream".to_string());

        let mut request = self.inner.http.get(endpoint);
        for (name, value) in &headers {
            request = request.header(name, value);
        }

        let response = tokio::time::timeout(GET_STREAM_TIMEOUT, request.send())
            .await
            .map_err(|_| TransportError::unexpected_status(0, "GET stream timed out"))??;

        match response.status().as_u16() {
            200 => {}
            405 => {
                return Err(TransportError::StreamsUnsupported { server: server_id.to_string() });
            }
            404 => return Err(self.inner.handle_session_404(server_id, true)),
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(TransportError::unexpected_status(status, body));
            }
        }

        let content_type =
            response.headers().get("content-type").and_then(|v| v.to_str().ok()).unwrap_or("");
        if !content_type.contains("text/event-stream") {
            return Err(TransportError::unexpected_status(
                200,
                format!("expected SSE stream, got content type: {content_type}"),
            ));
        }

        self.inner.spawn_stream_listener(server_id.clone(), response);
        Ok(())
    }
}

impl HttpClientInner {
    fn request_parts(&self, server_id: &PeerId) -> TransportResult<(Url, HashMap<String, String>)> {
        let servers = self.servers.lock().expect("server map lock poisoned");
        let server =
            servers.get(server_id).ok_or_else(|| TransportError::unknown_peer(server_id.to_string()))?;

        let mut headers = HashMap::new();
        headers.insert(PROTOCOL_VERSION_HEADER.to_string(), self.protocol_version.clone());
        if let Some(session_id) =
            self.sessions.lock().expect("session map lock poisoned").get(server_id)
        {
            headers.insert(SESSION_HEADER.to_string(), session_id.clone());
        }
        // Custom headers (auth and friends) ride along, but never override
        // the protocol headers.
        for (name, value) in &server.headers {
            headers.entry(name.clone()).or_insert_with(|| value.clone());
        }

        Ok((server.endpoint.clone(), headers))
    }

    /// Session-aware 404 handling: with a session recorded this is expiry;
    /// without, a plain connection failure.
    fn handle_session_404(&self, server_id: &PeerId, request_had_session: bool) -> TransportError {
        if request_had_session {
            let removed =
                self.sessions.lock().expect("session map lock poisoned").remove(server_id);
            if removed.is_some() {
                tracing::info!(server = %server_id, "Session expired; cleared session id");
                return TransportError::SessionExpired { server: server_id.to_string() };
            }
        }
        TransportError::unexpected_status(404, "Not Found")
    }

    /// Capture the session cookie from a successful `initialize` response.
    fn capture_session(&self, server_id: &PeerId, sent_frame: &Value, response: &reqwest::Response) {
        if sent_frame.get("method").and_then(Value::as_str) != Some("initialize") {
            return;
        }
        if let Some(session_id) =
            response.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok())
        {
            tracing::debug!(server = %server_id, "Established session");
            self.sessions
                .lock()
                .expect("session map lock poisoned")
                .insert(server_id.clone(), session_id.to_string());
        }
    }

    fn enqueue(&self, server_id: &PeerId, payload: Value) {
        let sender = self.queue_tx.lock().expect("queue sender lock poisoned").clone();
        if let Some(sender) = sender {
            let _ = sender.send(PeerMessage::new(server_id.clone(), payload));
        }
    }

    /// Drain an SSE response body in the background, enqueueing each `data:`
    /// frame as a server message. The listener ends when the stream closes.
    fn spawn_stream_listener(self: &Arc<Self>, server_id: PeerId, response: reqwest::Response) {
        let inner = Arc::clone(self);
        let id = server_id.clone();
        let task = tokio::spawn(async move {
            let mut buffer = String::new();
            let mut body = response.bytes_stream();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::debug!(server = %id, error = %e, "SSE stream ended with error");
                        break;
                    }
                };
                let Ok(text) = std::str::from_utf8(&chunk) else { continue };
                buffer.push_str(text);

                // SSE events are separated by blank lines.
                while let Some(pos) = buffer.find("\n\n") {
                    let event_block = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);
                    inner.process_sse_event(&id, &event_block);
                }
            }
            if !buffer.is_empty() {
                inner.process_sse_event(&id, &buffer);
            }
            tracing::debug!(server = %id, "SSE listener finished");
        });

        self.listeners
            .lock()
            .expect("listener map lock poisoned")
            .entry(server_id)
            .or_default()
            .push(task);
    }

    fn process_sse_event(&self, server_id: &PeerId, event_block: &str) {
        let mut data_lines: Vec<&str> = Vec::new();
        for line in event_block.lines() {
            if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.trim());
            }
            // `:` comments (keep-alives) and other fields are ignored.
        }
        let data = data_lines.join("\n");
        if data.is_empty() {
            return;
        }

        match serde_json::from_str::<Value>(&data) {
            Ok(payload) => self.enqueue(server_id, payload),
            Err(e) => {
                tracing::warn!(server = %server_id, error = %e, "Invalid JSON in SSE data");
            }
        }
    }

    fn stop_listeners(&self, server_id: &PeerId) {
        if let Some(tasks) =
            self.listeners.lock().expect("listener map lock poisoned").remove(server_id)
        {
            for task in tasks {
                task.abort();
            }
        }
    }

    /// Best-effort DELETE to terminate the session; local state is cleared
    /// regardless of the outcome.
    async fn terminate_session(&self, server_id: &PeerId) {
        let session_id =
            self.sessions.lock().expect("session map lock poisoned").remove(server_id);
        let Some(session_id) = session_id else { return };

        let parts = {
            let servers = self.servers.lock().expect("server map lock poisoned");
            servers.get(server_id).map(|s| (s.endpoint.clone(), s.headers.clone()))
        };
        let Some((endpoint, custom_headers)) = parts else { return };

        let mut request = self
            .http
            .delete(endpoint)
            .header(SESSION_HEADER, &session_id)
            .header(PROTOCOL_VERSION_HEADER, &self.protocol_version)
            .timeout(DELETE_TIMEOUT);
        for (name, value) in &custom_headers {
            request = request.header(name, value);
        }

        match request.send().await {
            Ok(response) => match response.status().as_u16() {
                200 => tracing::debug!(server = %server_id, "Session terminated"),
                405 => {
                    tracing::debug!(server = %server_id, "Server does not support session termination");
                }
                status => {
                    tracing::warn!(server = %server_id, status, "Unexpected response terminating session");
                }
            },
            Err(e) => {
                tracing::debug!(server = %server_id, error = %e, "Failed to terminate session");
            }
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpClientTransport {
    fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    async fn send(&self, peer: &PeerId, frame: Value, _ctx: TransportContext) -> TransportResult<()> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }

        let (endpoint, headers) = self.inner.request_parts(peer)?;
        let had_session = headers.contains_key(SESSION_HEADER);

        let mut request = self
            .inner
            .http
            .post(endpoint)
            .json(&frame)
            .header("Accept", "application/json, text/event-stream");
        for (name, value) in &headers {
            request = request.header(name, value);
        }

        // The timeout covers connection and response headers only; an SSE
        // body may stay open far longer than any single request.
        let response = tokio::time::timeout(POST_TIMEOUT, request.send())
            .await
            .map_err(|_| TransportError::unexpected_status(0, "POST timed out"))??;

        self.inner.capture_session(peer, &frame, &response);

        match response.status().as_u16() {
            200 => {
                let content_type = response
                    .headers()
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                if content_type.contains("application/json") {
                    let payload: Value = response.json().await?;
                    self.inner.enqueue(peer, payload);
                } else if content_type.contains("text/event-stream") {
                    self.inner.spawn_stream_listener(peer.clone(), response);
                } else {
                    tracing::warn!(server = %peer, content_type = %content_type, "Unexpected 200 content type");
                }
                Ok(())
            }
            202 => {
                tracing::debug!(server = %peer, "Message accepted (202)");
                Ok(())
            }
            404 => Err(self.inner.handle_session_404(peer, had_session)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::unexpected_status(status, body))
            }
        }
    }

    async fn recv(&self) -> Option<PeerMessage> {
        self.inner.queue_rx.lock().await.recv().await
    }

    async fn disconnect(&self, peer: &PeerId) -> TransportResult<()> {
        self.inner.stop_listeners(peer);
        self.inner.terminate_session(peer).await;
        self.inner.servers.lock().expect("server map lock poisoned").remove(peer);
        tracing::debug!(server = %peer, "Disconnected from server");
        Ok(())
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let server_ids: Vec<PeerId> = self
            .inner
            .listeners
            .lock()
            .expect("listener map lock poisoned")
            .keys()
            .cloned()
            .collect();
        for server_id in server_ids {
            self.inner.stop_listeners(&server_id);
        }

        self.inner.servers.lock().expect("server map lock poisoned").clear();
        self.inner.sessions.lock().expect("session map lock poisoned").clear();
        self.inner.queue_tx.lock().expect("queue sender lock poisoned").take();
        tracing::debug!("HTTP client transport closed");
    }
}

impl std::fmt::Debug for StreamableHttpClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamableHttpClientTransport").field("open", &self.is_open()).finish()
    }
}
