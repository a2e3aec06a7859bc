//! The message coordinator: drives one transport end.
//!
//! Owns the background receive loop, classifies every inbound frame, routes
//! requests and notifications to registered handlers, and correlates
//! responses with in-flight outbound requests. Sessions stay focused on
//! protocol logic; all message mechanics live here.
//!
//! One coordinator serves one transport. The client side holds one per
//! session; the server side multiplexes every client through a single
//! coordinator, keyed by the peer id the transport attaches to each frame.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::error::{SessionError, SessionResult, TransportError};
use crate::peers::{PeerId, PeerManager};
use crate::protocol::common::CancelledParams;
use crate::protocol::jsonrpc::{
    classify, frame_id, FrameKind, JsonRpcErrorResponse, JsonRpcResponse, RequestId, RpcError,
    PROTOCOL_VERSION_MISMATCH,
};
use crate::protocol::requests::{Notification, Request, RpcOutcome};
use crate::transport::{PeerMessage, Transport, TransportContext};

/// Boxed future returned by handlers.
pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Call context handed to a request handler: which peer sent the request
/// and under which id.
///
/// Frames produced while handling the request (progress, server-initiated
/// traffic) are sent against this context so transports can route them onto
/// the stream the request opened.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestContext {
    pub peer: PeerId,
    pub request_id: RequestId,
}

impl RequestContext {
    #[must_use]
    pub fn new(peer: impl Into<PeerId>, request_id: impl Into<RequestId>) -> Self {
        Self { peer: peer.into(), request_id: request_id.into() }
    }
}

/// Handler for inbound requests. Returns the result or error to send back.
pub type RequestHandler =
    Arc<dyn Fn(RequestContext, Request) -> HandlerFuture<RpcOutcome> + Send + Sync>;

/// Handler for inbound notifications. Fire-and-forget.
pub type NotificationHandler = Arc<dyn Fn(PeerId, Notification) -> HandlerFuture<()> + Send + Sync>;

/// Coordinates all message flow for one transport end.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    peers: Arc<PeerManager>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, peers: Arc<PeerManager>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                peers,
                request_handlers: RwLock::new(HashMap::new()),
                notification_handlers: RwLock::new(HashMap::new()),
                loop_task: Mutex::new(None),
            }),
        }
    }

    /// The peer state this coordinator tracks against.
    #[must_use]
    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.inner.peers
    }

    // ================================
    // Handler registration
    // ================================

    /// Register a handler for a request method. Flat `method -> handler`;
    /// capability gating belongs to the session layer.
    pub fn register_request_handler(&self, method: impl Into<String>, handler: RequestHandler) {
        self.inner
            .request_handlers
            .write()
            .expect("handler map lock poisoned")
            .insert(method.into(), handler);
    }

    /// Register a handler for a notification method.
    pub fn register_notification_handler(
        &self,
        method: impl Into<String>,
        handler: NotificationHandler,
    ) {
        self.inner
            .notification_handlers
            .write()
            .expect("handler map lock poisoned")
            .insert(method.into(), handler);
    }

    // ================================
    // Lifecycle
    // ================================

    /// True if the receive loop is actively processing messages.
    #[must_use]
    pub fn running(&self) -> bool {
        self.inner
            .loop_task
            .lock()
            .expect("loop task lock poisoned")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start the background receive loop.
    ///
    /// Safe to call multiple times; subsequent calls are ignored while the
    /// loop is running. Fails if the transport is closed.
    pub fn start(&self) -> SessionResult<()> {
        if self.running() {
            return Ok(());
        }
        if !self.inner.transport.is_open() {
            return Err(TransportError::Closed.into());
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(Inner::receive_loop(inner));
        *self.inner.loop_task.lock().expect("loop task lock poisoned") = Some(task);
        Ok(())
    }

    /// Stop message processing and clean up every peer's request tables.
    ///
    /// Safe to call multiple times.
    pub async fn stop(&self) {
        let task = self.inner.loop_task.lock().expect("loop task lock poisoned").take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        self.inner.peers.cleanup_all();
    }

    fn ensure_ready(&self) -> SessionResult<()> {
        if !self.running() {
            self.start()?;
        }
        if !self.inner.transport.is_open() {
            return Err(TransportError::Closed.into());
        }
        Ok(())
    }

    // ================================
    // Outbound
    // ================================

    /// Send a request and wait for the correlated response.
    ///
    /// Starts the receive loop if needed. Non-ping requests to an
    /// uninitialized peer fail locally without touching the wire. On timeout
    /// the tracker entry is removed and a `notifications/cancelled` is sent,
    /// except for `initialize` where tearing down the session is the
    /// caller's job.
    pub async fn send_request(
        &self,
        peer: &PeerId,
        request: Request,
        timeout: Duration,
    ) -> SessionResult<RpcOutcome> {
        self.ensure_ready()?;

        if !request.allowed_before_initialized() && !self.inner.peers.is_initialized(peer) {
            return Err(SessionError::NotInitialized { method: request.method().to_string() });
        }

        let id = RequestId::fresh();
        let (sender, receiver) = tokio::sync::oneshot::channel();

        self.inner.peers.register(peer);
        self.inner
            .peers
            .track_outbound(peer, id.clone(), request.clone(), sender)
            .map_err(|e| TransportError::unknown_peer(e.0))?;

        let frame = request.to_wire(id.clone()).to_value();
        if let Err(e) = self.inner.transport.send(peer, frame, TransportContext::default()).await {
            self.inner.peers.remove_outbound(peer, &id);
            return Err(e.into());
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Ok(Err(RpcError::internal("Request abandoned by tracker"))),
            Err(_) => {
                self.handle_request_timeout(peer, &id, &request).await;
                Err(SessionError::Timeout { method: request.method().to_string(), timeout })
            }
        }
    }

    async fn handle_request_timeout(&self, peer: &PeerId, id: &RequestId, request: &Request) {
        self.inner.peers.remove_outbound(peer, id);

        // Initialize is never cancelled: the peer may still be producing the
        // reply, and the right move is to tear the session down instead.
        if request.is_initialize() {
            return;
        }

        let cancelled =
            Notification::Cancelled(CancelledParams::new(id.clone(), "Request timed out"));
        if let Err(e) = self.send_notification(peer, cancelled).await {
            tracing::warn!(peer = %peer, id = %id, error = %e, "Failed to send cancellation");
        }
    }

    /// Send a notification. Starts the receive loop if needed; no tracking.
    pub async fn send_notification(
        &self,
        peer: &PeerId,
        notification: Notification,
    ) -> SessionResult<()> {
        self.ensure_ready()?;
        let frame = notification.to_wire().to_value();
        self.inner.transport.send(peer, frame, TransportContext::default()).await?;
        Ok(())
    }

    /// Send a notification correlated to an inbound request still being
    /// handled. On the Streamable HTTP server this routes the frame onto
    /// the SSE stream that request opened instead of requiring a separate
    /// server stream.
    pub async fn send_notification_for_request(
        &self,
        ctx: &RequestContext,
        notification: Notification,
    ) -> SessionResult<()> {
        self.ensure_ready()?;
        let frame = notification.to_wire().to_value();
        let transport_ctx = TransportContext::for_request(ctx.request_id.clone());
        self.inner.transport.send(&ctx.peer, frame, transport_ctx).await?;
        Ok(())
    }

    /// Cancel the handler for an inbound request, if still running.
    ///
    /// Entry point for the `notifications/cancelled` handler. Returns true
    /// if the id was known and the task was cancelled.
    #[must_use]
    pub fn cancel_inbound(&self, peer: &PeerId, id: &RequestId) -> bool {
        self.inner.peers.cancel_inbound(peer, id)
    }
}

impl Inner {
    /// Process inbound messages until the transport closes.
    ///
    /// Per-frame failures are logged and skipped; only transport shutdown
    /// ends the loop, after which every peer's tables are cleaned up.
    async fn receive_loop(self: Arc<Self>) {
        while let Some(message) = self.transport.recv().await {
            self.route_message(message).await;
        }
        tracing::info!("Transport closed; cleaning up all peers");
        self.peers.cleanup_all();
    }

    async fn route_message(self: &Arc<Self>, message: PeerMessage) {
        let PeerMessage { peer_id, payload, .. } = message;

        // Batch arrays are processed element-wise.
        if let Value::Array(frames) = payload {
            for frame in frames {
                self.route_frame(&peer_id, frame).await;
            }
        } else {
            self.route_frame(&peer_id, payload).await;
        }
    }

    async fn route_frame(self: &Arc<Self>, peer: &PeerId, payload: Value) {
        match classify(&payload) {
            FrameKind::Request => self.handle_request(peer, &payload).await,
            FrameKind::Notification => self.handle_notification(peer, &payload),
            FrameKind::Response => self.handle_response(peer, &payload),
            FrameKind::Invalid => {
                tracing::warn!(peer = %peer, payload = %payload, "Unknown message shape; dropping");
            }
        }
    }

    // ================================
    // Inbound requests
    // ================================

    async fn handle_request(self: &Arc<Self>, peer: &PeerId, payload: &Value) {
        let Some(id) = frame_id(payload) else { return };
        let method = payload.get("method").and_then(Value::as_str).unwrap_or_default();

        self.peers.register(peer);

        match Request::parse(method, payload.get("params")) {
            Ok(request) => self.dispatch_request(peer.clone(), id, request),
            Err(error) => self.send_error_response(peer, id, error).await,
        }
    }

    fn dispatch_request(self: &Arc<Self>, peer: PeerId, id: RequestId, request: Request) {
        let handler = self
            .request_handlers
            .read()
            .expect("handler map lock poisoned")
            .get(request.method())
            .cloned();

        let Some(handler) = handler else {
            let error =
                RpcError::method_not_found(format!("No handler for method: {}", request.method()));
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                inner.send_error_response(&peer, id, error).await;
            });
            return;
        };

        tracing::debug!(peer = %peer, method = %request.method(), id = %id, "Dispatching request");

        let context = RequestContext { peer: peer.clone(), request_id: id.clone() };
        let handler_task = tokio::spawn(handler(context, request.clone()));
        if self.peers.track_inbound(&peer, id.clone(), request.clone(), handler_task.abort_handle()).is_err() {
            handler_task.abort();
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match handler_task.await {
                Ok(outcome) => outcome,
                Err(join_error) if join_error.is_cancelled() => {
                    Err(RpcError::internal(format!("Request {id} cancelled")))
                }
                Err(_) => Err(RpcError::internal("Problem handling request")
                    .with_data(json!({"request": request.to_wire(id.clone()).to_value()}))),
            };

            let disconnect = matches!(&outcome, Err(e) if e.code == PROTOCOL_VERSION_MISMATCH);

            let frame = match outcome {
                Ok(result) => JsonRpcResponse::new(id.clone(), result.to_value()).to_value(),
                Err(error) => JsonRpcErrorResponse::new(id.clone(), error).to_value(),
            };
            let ctx = TransportContext::for_request(id.clone());
            if let Err(e) = inner.transport.send(&peer, frame, ctx).await {
                tracing::warn!(peer = %peer, id = %id, error = %e, "Failed to send response");
            }

            inner.peers.untrack_inbound(&peer, &id);

            // A version-mismatch reply ends the session for that peer.
            if disconnect {
                tracing::info!(peer = %peer, "Protocol version mismatch; disconnecting peer");
                inner.peers.remove_peer(&peer);
                let _ = inner.transport.disconnect(&peer).await;
            }
        });
    }

    async fn send_error_response(&self, peer: &PeerId, id: RequestId, error: RpcError) {
        let frame = JsonRpcErrorResponse::new(id.clone(), error).to_value();
        let ctx = TransportContext::for_request(id.clone());
        if let Err(e) = self.transport.send(peer, frame, ctx).await {
            tracing::warn!(peer = %peer, id = %id, error = %e, "Failed to send error response");
        }
    }

    // ================================
    // Inbound notifications
    // ================================

    fn handle_notification(&self, peer: &PeerId, payload: &Value) {
        let method = payload.get("method").and_then(Value::as_str).unwrap_or_default();

        let notification = match Notification::parse(method, payload.get("params")) {
            Ok(notification) => notification,
            Err(error) => {
                // No reply channel for notifications: log and drop.
                tracing::debug!(peer = %peer, method = %method, error = %error, "Dropping malformed notification");
                return;
            }
        };

        let handler = self
            .notification_handlers
            .read()
            .expect("handler map lock poisoned")
            .get(method)
            .cloned();

        let Some(handler) = handler else {
            tracing::debug!(peer = %peer, method = %method, "Unknown notification; dropping");
            return;
        };

        // Detached: notifications never block subsequent message processing
        // and are not tracked.
        tokio::spawn(handler(peer.clone(), notification));
    }

    // ================================
    // Inbound responses
    // ================================

    fn handle_response(&self, peer: &PeerId, payload: &Value) {
        let Some(id) = frame_id(payload) else { return };

        let Some(original) = self.peers.get_outbound_request(peer, &id) else {
            tracing::debug!(peer = %peer, id = %id, "Unmatched response; dropping");
            return;
        };

        let outcome: RpcOutcome = if let Some(error_value) = payload.get("error") {
            match serde_json::from_value::<RpcError>(error_value.clone()) {
                Ok(error) => Err(error),
                Err(e) => Err(RpcError::internal("Malformed error object in response")
                    .with_data(json!({"error": error_value, "detail": e.to_string()}))),
            }
        } else {
            let result = payload.get("result").cloned().unwrap_or(Value::Null);
            original.parse_result(result)
        };

        self.peers.resolve_outbound(peer, &id, outcome);
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator").field("running", &self.running()).finish()
    }
}
