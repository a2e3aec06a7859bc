//! Client session: the ergonomic surface over one or more MCP servers.
//!
//! Binds the coordinator to the domain: performs the initialize handshake,
//! gates outbound calls on the server's advertised capabilities, answers
//! server-initiated requests (ping, roots, sampling, elicitation), and keeps
//! per-server projections fresh from change notifications.

use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use crate::config::SessionConfig;
use crate::coordinator::{Coordinator, HandlerFuture, RequestContext};
use crate::error::{SessionError, SessionResult};
use crate::peers::{PeerCapabilities, PeerId, PeerManager};
use crate::protocol::common::{PingParams, ProgressParams};
use crate::protocol::completion::{CompleteParams, CompleteResult};
use crate::protocol::elicitation::{ElicitParams, ElicitResult};
use crate::protocol::initialization::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, ServerCapabilities,
};
use crate::protocol::jsonrpc::{RpcError, PROTOCOL_VERSION_MISMATCH};
use crate::protocol::logging::{LoggingLevel, SetLevelParams};
use crate::protocol::meta::ProgressToken;
use crate::protocol::prompts::{GetPromptParams, GetPromptResult, ListPromptsParams, ListPromptsResult};
use crate::protocol::requests::{methods, Notification, ProtocolResult, Request};
use crate::protocol::resources::{
    ListResourceTemplatesParams, ListResourceTemplatesResult, ListResourcesParams,
    ListResourcesResult, ReadResourceParams, ReadResourceResult, SubscribeParams, UnsubscribeParams,
};
use crate::protocol::roots::{ListRootsResult, Root};
use crate::protocol::sampling::{CreateMessageParams, CreateMessageResult};
use crate::protocol::tools::{CallToolParams, CallToolResult, ListToolsParams, ListToolsResult};
use crate::session::callbacks::ClientCallbacks;
use crate::transport::Transport;

/// Async handler fulfilling `sampling/createMessage` on behalf of the host.
pub type SamplingHandler = Arc<
    dyn Fn(RequestContext, CreateMessageParams) -> HandlerFuture<Result<CreateMessageResult, RpcError>>
        + Send
        + Sync,
>;

/// Async handler fulfilling `elicitation/create`.
pub type ElicitationHandler = Arc<
    dyn Fn(RequestContext, ElicitParams) -> HandlerFuture<Result<ElicitResult, RpcError>>
        + Send
        + Sync,
>;

/// Client identity and negotiation settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub info: Implementation,
    pub capabilities: ClientCapabilities,
    pub protocol_version: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    #[must_use]
    pub fn new(info: Implementation) -> Self {
        let session = SessionConfig::default();
        Self {
            info,
            capabilities: ClientCapabilities::default(),
            protocol_version: session.protocol_version,
            request_timeout: session.request_timeout,
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    peers: Arc<PeerManager>,
    coordinator: Coordinator,
    callbacks: ClientCallbacks,
    roots: RwLock<Vec<Root>>,
    sampling_handler: RwLock<Option<SamplingHandler>>,
    elicitation_handler: RwLock<Option<ElicitationHandler>>,
}

/// An MCP client session over any transport. Clones share the session.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<ClientInner>,
}

impl ClientSession {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let peers = Arc::new(PeerManager::new());
        let coordinator = Coordinator::new(Arc::clone(&transport), Arc::clone(&peers));

        let inner = Arc::new(ClientInner {
            config,
            transport,
            peers,
            coordinator,
            callbacks: ClientCallbacks::default(),
            roots: RwLock::new(Vec::new()),
            sampling_handler: RwLock::new(None),
            elicitation_handler: RwLock::new(None),
        });
        register_handlers(&inner);

        Self { inner }
    }

    // ================================
    // Lifecycle
    // ================================

    /// Begin accepting and processing server messages.
    pub fn start(&self) -> SessionResult<()> {
        self.inner.coordinator.start()
    }

    /// Stop message processing and clean up all request tracking.
    pub async fn stop(&self) {
        self.inner.coordinator.stop().await;
    }

    /// Disconnect one server: cancel its in-flight requests, tear down the
    /// transport connection, drop the peer record. Failed steps are logged
    /// and never block later ones.
    pub async fn disconnect(&self, server: &PeerId) {
        self.inner.peers.cleanup_peer(server);
        if let Err(e) = self.inner.transport.disconnect(server).await {
            tracing::warn!(server = %server, error = %e, "Transport disconnect failed");
        }
        self.inner.peers.remove_peer(server);
    }

    /// Stop the session entirely and close the transport.
    pub async fn shutdown(&self) {
        self.inner.coordinator.stop().await;
        for server in self.inner.peers.peer_ids() {
            if let Err(e) = self.inner.transport.disconnect(&server).await {
                tracing::warn!(server = %server, error = %e, "Transport disconnect failed");
            }
            self.inner.peers.remove_peer(&server);
        }
        self.inner.transport.close().await;
    }

    // ================================
    // Initialization
    // ================================

    /// Perform the MCP handshake with a server.
    ///
    /// Sends `initialize`, verifies the protocol version matches exactly,
    /// sends `notifications/initialized`, and marks the peer initialized.
    /// Safe to call again once initialized; the negotiated result is
    /// returned from peer state.
    ///
    /// # Errors
    ///
    /// [`SessionError::VersionMismatch`] tears the connection down; other
    /// handshake failures also disconnect the server before returning.
    pub async fn initialize(&self, server: &PeerId) -> SessionResult<InitializeResult> {
        self.initialize_with_timeout(server, self.inner.config.request_timeout).await
    }

    /// [`Self::initialize`] with an explicit timeout.
    pub async fn initialize_with_timeout(
        &self,
        server: &PeerId,
        timeout: Duration,
    ) -> SessionResult<InitializeResult> {
        if self.inner.peers.is_initialized(server) {
            if let Some(result) = self.negotiated_result(server) {
                return Ok(result);
            }
        }

        match self.do_initialize(server, timeout).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.disconnect(server).await;
                Err(e)
            }
        }
    }

    async fn do_initialize(&self, server: &PeerId, timeout: Duration) -> SessionResult<InitializeResult> {
        let config = &self.inner.config;
        let request = Request::Initialize(InitializeParams {
            protocol_version: config.protocol_version.clone(),
            client_info: config.info.clone(),
            capabilities: config.capabilities.clone(),
            meta: None,
        });

        let outcome = self.inner.coordinator.send_request(server, request, timeout).await?;
        let result = match outcome {
            Ok(ProtocolResult::Initialize(result)) => result,
            Ok(other) => {
                return Err(SessionError::UnexpectedResult {
                    expected: "initialize",
                    got: other.kind(),
                });
            }
            Err(error) if error.code == PROTOCOL_VERSION_MISMATCH => {
                let theirs = error
                    .data
                    .as_ref()
                    .and_then(|d| d.get("supported"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                return Err(SessionError::VersionMismatch {
                    ours: config.protocol_version.clone(),
                    theirs,
                });
            }
            Err(error) => return Err(SessionError::Handshake(error.message)),
        };

        if result.protocol_version != config.protocol_version {
            return Err(SessionError::VersionMismatch {
                ours: config.protocol_version.clone(),
                theirs: result.protocol_version,
            });
        }

        // The peer counts as initialized only once the notification is out.
        self.inner.coordinator.send_notification(server, Notification::Initialized).await?;

        self.inner.peers.store_identity(
            server,
            PeerCapabilities::Server(result.capabilities.clone()),
            result.server_info.clone(),
            config.protocol_version.clone(),
        );
        self.inner.peers.with_peer(server, |state| {
            state.instructions = result.instructions.clone();
        });
        self.inner.peers.set_initialized(server);

        tracing::info!(server = %server, "Session initialized");
        Ok(result)
    }

    fn negotiated_result(&self, server: &PeerId) -> Option<InitializeResult> {
        let capabilities = self.inner.peers.capabilities(server)?.as_server()?.clone();
        let server_info = self.inner.peers.info(server)?;
        let protocol_version = self.inner.peers.protocol_version(server)?;
        let instructions =
            self.inner.peers.with_peer(server, |state| state.instructions.clone()).flatten();
        Some(InitializeResult { protocol_version, capabilities, server_info, instructions })
    }

    // ================================
    // Domain calls
    // ================================

    /// Health check; allowed before initialization.
    pub async fn ping(&self, server: &PeerId) -> SessionResult<()> {
        self.request(server, Request::Ping(PingParams::default())).await.map(|_| ())
    }

    pub async fn list_tools(&self, server: &PeerId) -> SessionResult<ListToolsResult> {
        match self.request(server, Request::ListTools(ListToolsParams::default())).await? {
            ProtocolResult::ListTools(result) => Ok(result),
            other => Err(unexpected("tools/list", &other)),
        }
    }

    pub async fn call_tool(
        &self,
        server: &PeerId,
        params: CallToolParams,
    ) -> SessionResult<CallToolResult> {
        match self.request(server, Request::CallTool(params)).await? {
            ProtocolResult::CallTool(result) => Ok(result),
            other => Err(unexpected("tools/call", &other)),
        }
    }

    pub async fn list_resources(&self, server: &PeerId) -> SessionResult<ListResourcesResult> {
        match self.request(server, Request::ListResources(ListResourcesParams::default())).await? {
            ProtocolResult::ListResources(result) => Ok(result),
            other => Err(unexpected("resources/list", &other)),
        }
    }

    pub async fn list_resource_templates(
        &self,
        server: &PeerId,
    ) -> SessionResult<ListResourceTemplatesResult> {
        let request = Request::ListResourceTemplates(ListResourceTemplatesParams::default());
        match self.request(server, request).await? {
            ProtocolResult::ListResourceTemplates(result) => Ok(result),
            other => Err(unexpected("resources/templates/list", &other)),
        }
    }

    pub async fn read_resource(
        &self,
        server: &PeerId,
        uri: impl Into<String>,
    ) -> SessionResult<ReadResourceResult> {
        let request = Request::ReadResource(ReadResourceParams { uri: uri.into(), meta: None });
        match self.request(server, request).await? {
            ProtocolResult::ReadResource(result) => Ok(result),
            other => Err(unexpected("resources/read", &other)),
        }
    }

    /// Subscribe to update notifications for a resource. Requires the
    /// server to have advertised `resources.subscribe`.
    pub async fn subscribe(&self, server: &PeerId, uri: impl Into<String>) -> SessionResult<()> {
        self.require_server_capability(server, "resources.subscribe", |caps| {
            caps.supports_subscribe()
        })?;
        let uri = uri.into();
        let request = Request::Subscribe(SubscribeParams { uri: uri.clone(), meta: None });
        self.request(server, request).await?;
        self.inner.peers.with_peer(server, |state| {
            state.subscriptions.insert(uri);
        });
        Ok(())
    }

    pub async fn unsubscribe(&self, server: &PeerId, uri: impl Into<String>) -> SessionResult<()> {
        self.require_server_capability(server, "resources.subscribe", |caps| {
            caps.supports_subscribe()
        })?;
        let uri = uri.into();
        let request = Request::Unsubscribe(UnsubscribeParams { uri: uri.clone(), meta: None });
        self.request(server, request).await?;
        self.inner.peers.with_peer(server, |state| {
            state.subscriptions.remove(&uri);
        });
        Ok(())
    }

    pub async fn list_prompts(&self, server: &PeerId) -> SessionResult<ListPromptsResult> {
        match self.request(server, Request::ListPrompts(ListPromptsParams::default())).await? {
            ProtocolResult::ListPrompts(result) => Ok(result),
            other => Err(unexpected("prompts/list", &other)),
        }
    }

    pub async fn get_prompt(
        &self,
        server: &PeerId,
        params: GetPromptParams,
    ) -> SessionResult<GetPromptResult> {
        match self.request(server, Request::GetPrompt(params)).await? {
            ProtocolResult::GetPrompt(result) => Ok(result),
            other => Err(unexpected("prompts/get", &other)),
        }
    }

    /// Ask for completion candidates. Requires the `completions` capability.
    pub async fn complete(
        &self,
        server: &PeerId,
        params: CompleteParams,
    ) -> SessionResult<CompleteResult> {
        self.require_server_capability(server, "completions", ServerCapabilities::supports_completions)?;
        match self.request(server, Request::Complete(params)).await? {
            ProtocolResult::Complete(result) => Ok(result),
            other => Err(unexpected("completion/complete", &other)),
        }
    }

    /// Set the server's minimum log level. Requires the `logging` capability.
    pub async fn set_log_level(&self, server: &PeerId, level: LoggingLevel) -> SessionResult<()> {
        self.require_server_capability(server, "logging", ServerCapabilities::supports_logging)?;
        let request = Request::SetLevel(SetLevelParams { level, meta: None });
        self.request(server, request).await.map(|_| ())
    }

    /// Send any typed request and get the raw outcome.
    pub async fn send_request(
        &self,
        server: &PeerId,
        request: Request,
    ) -> SessionResult<ProtocolResult> {
        self.request(server, request).await
    }

    pub async fn send_notification(
        &self,
        server: &PeerId,
        notification: Notification,
    ) -> SessionResult<()> {
        self.inner.coordinator.send_notification(server, notification).await
    }

    /// Report progress on the server request a handler is currently
    /// serving, correlated to that request.
    pub async fn notify_progress(
        &self,
        ctx: &RequestContext,
        token: ProgressToken,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> SessionResult<()> {
        let notification = Notification::Progress(ProgressParams {
            progress_token: token,
            progress,
            total,
            message,
        });
        self.inner.coordinator.send_notification_for_request(ctx, notification).await
    }

    // ================================
    // Roots
    // ================================

    /// Replace the advertised filesystem roots.
    pub fn set_roots(&self, roots: Vec<Root>) {
        *self.inner.roots.write().expect("roots lock poisoned") = roots;
    }

    /// Tell a server the roots list changed.
    pub async fn notify_roots_list_changed(&self, server: &PeerId) -> SessionResult<()> {
        self.send_notification(server, Notification::RootsListChanged).await
    }

    // ================================
    // Application hooks
    // ================================

    pub fn set_sampling_handler(&self, handler: SamplingHandler) {
        *self.inner.sampling_handler.write().expect("sampling handler lock poisoned") = Some(handler);
    }

    pub fn set_elicitation_handler(&self, handler: ElicitationHandler) {
        *self.inner.elicitation_handler.write().expect("elicitation handler lock poisoned") =
            Some(handler);
    }

    #[must_use]
    pub fn callbacks(&self) -> &ClientCallbacks {
        &self.inner.callbacks
    }

    /// Peer state, including the projections refreshed by change
    /// notifications.
    #[must_use]
    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.inner.peers
    }

    // ================================
    // Helpers
    // ================================

    async fn request(&self, server: &PeerId, request: Request) -> SessionResult<ProtocolResult> {
        let outcome = self
            .inner
            .coordinator
            .send_request(server, request, self.inner.config.request_timeout)
            .await?;
        outcome.map_err(SessionError::from)
    }

    fn require_server_capability(
        &self,
        server: &PeerId,
        name: &str,
        check: impl Fn(&ServerCapabilities) -> bool,
    ) -> SessionResult<()> {
        let supported = self
            .inner
            .peers
            .capabilities(server)
            .as_ref()
            .and_then(PeerCapabilities::as_server)
            .is_some_and(check);
        if supported {
            Ok(())
        } else {
            Err(RpcError::method_not_found(format!("Server does not support {name} capability"))
                .into())
        }
    }
}

fn unexpected(expected: &'static str, got: &ProtocolResult) -> SessionError {
    SessionError::UnexpectedResult { expected, got: got.kind() }
}

// ================================
// Inbound handlers
// ================================

fn register_handlers(inner: &Arc<ClientInner>) {
    let coordinator = &inner.coordinator;

    // Ping is always answered, initialized or not.
    coordinator.register_request_handler(
        methods::PING,
        Arc::new(|_ctx, _request| Box::pin(async { Ok(ProtocolResult::Empty) })),
    );

    let weak = Arc::downgrade(inner);
    coordinator.register_request_handler(
        methods::ROOTS_LIST,
        Arc::new(move |ctx, _request| {
            let weak = weak.clone();
            Box::pin(async move { upgrade(&weak)?.handle_list_roots(&ctx.peer) })
        }),
    );

    let weak = Arc::downgrade(inner);
    coordinator.register_request_handler(
        methods::SAMPLING_CREATE_MESSAGE,
        Arc::new(move |ctx, request| {
            let weak = weak.clone();
            Box::pin(async move {
                let Request::CreateMessage(params) = request else {
                    return Err(RpcError::internal("Mismatched request variant"));
                };
                upgrade(&weak)?.handle_create_message(ctx, params).await
            })
        }),
    );

    let weak = Arc::downgrade(inner);
    coordinator.register_request_handler(
        methods::ELICITATION_CREATE,
        Arc::new(move |ctx, request| {
            let weak = weak.clone();
            Box::pin(async move {
                let Request::Elicit(params) = request else {
                    return Err(RpcError::internal("Mismatched request variant"));
                };
                upgrade(&weak)?.handle_elicit(ctx, params).await
            })
        }),
    );

    let notification_handlers: [(&str, fn(Arc<ClientInner>, PeerId, Notification) -> HandlerFuture<()>); 7] = [
        (methods::CANCELLED, |inner, peer, n| Box::pin(async move { inner.handle_cancelled(&peer, n) })),
        (methods::PROGRESS, |inner, peer, n| Box::pin(async move { inner.handle_progress(&peer, n) })),
        (methods::TOOLS_LIST_CHANGED, |inner, peer, _| {
            Box::pin(async move { inner.handle_tools_list_changed(&peer).await })
        }),
        (methods::RESOURCES_LIST_CHANGED, |inner, peer, _| {
            Box::pin(async move { inner.handle_resources_list_changed(&peer).await })
        }),
        (methods::RESOURCES_UPDATED, |inner, peer, n| {
            Box::pin(async move { inner.handle_resource_updated(&peer, n).await })
        }),
        (methods::PROMPTS_LIST_CHANGED, |inner, peer, _| {
            Box::pin(async move { inner.handle_prompts_list_changed(&peer).await })
        }),
        (methods::MESSAGE, |inner, peer, n| Box::pin(async move { inner.handle_log_message(&peer, n) })),
    ];

    for (method, handler) in notification_handlers {
        let weak = Arc::downgrade(inner);
        coordinator.register_notification_handler(
            method,
            Arc::new(move |peer, notification| {
                let weak = weak.clone();
                Box::pin(async move {
                    if let Some(inner) = weak.upgrade() {
                        handler(inner, peer, notification).await;
                    }
                })
            }),
        );
    }
}

fn upgrade(weak: &Weak<ClientInner>) -> Result<Arc<ClientInner>, RpcError> {
    weak.upgrade().ok_or_else(|| RpcError::internal("Session closed"))
}

impl ClientInner {
    fn handle_list_roots(&self, _peer: &PeerId) -> Result<ProtocolResult, RpcError> {
        if self.config.capabilities.roots.is_none() {
            return Err(RpcError::method_not_found("Client does not support roots capability"));
        }
        let roots = self.roots.read().expect("roots lock poisoned").clone();
        Ok(ProtocolResult::ListRoots(ListRootsResult { roots }))
    }

    async fn handle_create_message(
        &self,
        ctx: RequestContext,
        params: CreateMessageParams,
    ) -> Result<ProtocolResult, RpcError> {
        if !self.config.capabilities.sampling {
            return Err(RpcError::method_not_found("Client does not support sampling capability"));
        }
        let handler = self.sampling_handler.read().expect("sampling handler lock poisoned").clone();
        let Some(handler) = handler else {
            return Err(RpcError::method_not_found("Sampling handler not configured"));
        };
        handler(ctx, params).await.map(ProtocolResult::CreateMessage)
    }

    async fn handle_elicit(
        &self,
        ctx: RequestContext,
        params: ElicitParams,
    ) -> Result<ProtocolResult, RpcError> {
        if !self.config.capabilities.elicitation {
            return Err(RpcError::method_not_found(
                "Client does not support elicitation capability",
            ));
        }
        let handler =
            self.elicitation_handler.read().expect("elicitation handler lock poisoned").clone();
        let Some(handler) = handler else {
            return Err(RpcError::method_not_found("Elicitation handler not configured"));
        };
        handler(ctx, params).await.map(ProtocolResult::Elicit)
    }

    // ================================
    // Notification handlers
    // ================================

    fn handle_cancelled(&self, peer: &PeerId, notification: Notification) {
        let Notification::Cancelled(params) = notification else { return };
        let cancelled = self.coordinator.cancel_inbound(peer, &params.request_id);
        tracing::debug!(peer = %peer, id = %params.request_id, cancelled, "Peer cancelled request");
        self.callbacks.fire_cancelled(peer, params);
    }

    fn handle_progress(&self, peer: &PeerId, notification: Notification) {
        let Notification::Progress(params) = notification else { return };
        self.callbacks.fire_progress(peer, params);
    }

    fn handle_log_message(&self, peer: &PeerId, notification: Notification) {
        let Notification::Message(params) = notification else { return };
        self.callbacks.fire_log_message(peer, params);
    }

    async fn request(&self, server: &PeerId, request: Request) -> SessionResult<ProtocolResult> {
        let outcome =
            self.coordinator.send_request(server, request, self.config.request_timeout).await?;
        outcome.map_err(SessionError::from)
    }

    /// Refresh the tools projection. Failures must not disrupt the session.
    async fn handle_tools_list_changed(&self, peer: &PeerId) {
        match self.request(peer, Request::ListTools(ListToolsParams::default())).await {
            Ok(ProtocolResult::ListTools(result)) => {
                self.peers.with_peer(peer, |state| state.tools = Some(result.tools.clone()));
                self.callbacks.fire_tools_changed(peer, result.tools);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(peer = %peer, error = %e, "Tools refresh failed; ignoring"),
        }
    }

    /// Refresh resources and templates independently; the callback fires if
    /// at least one refresh succeeded.
    async fn handle_resources_list_changed(&self, peer: &PeerId) {
        let mut resources = None;
        let mut templates = None;

        match self.request(peer, Request::ListResources(ListResourcesParams::default())).await {
            Ok(ProtocolResult::ListResources(result)) => {
                self.peers.with_peer(peer, |state| state.resources = Some(result.resources.clone()));
                resources = Some(result.resources);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Resource refresh failed; ignoring");
            }
        }

        let request = Request::ListResourceTemplates(ListResourceTemplatesParams::default());
        match self.request(peer, request).await {
            Ok(ProtocolResult::ListResourceTemplates(result)) => {
                self.peers.with_peer(peer, |state| {
                    state.resource_templates = Some(result.resource_templates.clone());
                });
                templates = Some(result.resource_templates);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Template refresh failed; ignoring");
            }
        }

        if resources.is_some() || templates.is_some() {
            self.callbacks.fire_resources_changed(
                peer,
                resources.unwrap_or_default(),
                templates.unwrap_or_default(),
            );
        }
    }

    async fn handle_resource_updated(&self, peer: &PeerId, notification: Notification) {
        let Notification::ResourceUpdated(params) = notification else { return };
        let request =
            Request::ReadResource(ReadResourceParams { uri: params.uri.clone(), meta: None });
        match self.request(peer, request).await {
            Ok(ProtocolResult::ReadResource(result)) => {
                self.callbacks.fire_resource_updated(peer, params.uri, result);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(peer = %peer, uri = %params.uri, error = %e, "Resource read failed; ignoring");
            }
        }
    }

    async fn handle_prompts_list_changed(&self, peer: &PeerId) {
        match self.request(peer, Request::ListPrompts(ListPromptsParams::default())).await {
            Ok(ProtocolResult::ListPrompts(result)) => {
                self.peers.with_peer(peer, |state| state.prompts = Some(result.prompts.clone()));
                self.callbacks.fire_prompts_changed(peer, result.prompts);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(peer = %peer, error = %e, "Prompt refresh failed; ignoring"),
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("client", &self.inner.config.info.name)
            .field("peers", &self.inner.peers.peer_count())
            .finish()
    }
}
