//! Server session: protocol logic for any number of connected clients.
//!
//! Each client keeps its own peer state and initialization flag. Inbound
//! requests are gated on the capabilities this server actually advertises;
//! outbound server-to-client calls are gated on what each client advertised
//! during its handshake.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::SessionConfig;
use crate::coordinator::{Coordinator, RequestContext};
use crate::error::{SessionError, SessionResult};
use crate::peers::{PeerCapabilities, PeerId, PeerManager};
use crate::protocol::common::ProgressParams;
use crate::protocol::elicitation::{ElicitParams, ElicitResult};
use crate::protocol::initialization::{
    ClientCapabilities, Implementation, InitializeResult, ServerCapabilities,
};
use crate::protocol::jsonrpc::RpcError;
use crate::protocol::logging::{LoggingLevel, LoggingMessageParams};
use crate::protocol::meta::ProgressToken;
use crate::protocol::requests::{methods, Notification, ProtocolResult, Request};
use crate::protocol::roots::{ListRootsParams, ListRootsResult};
use crate::protocol::sampling::{CreateMessageParams, CreateMessageResult};
use crate::session::callbacks::ServerCallbacks;
use crate::session::managers::{CompletionManager, PromptManager, ResourceManager, ToolManager};
use crate::transport::Transport;

/// Server identity, advertised capabilities, and negotiation settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub info: Implementation,
    pub capabilities: ServerCapabilities,
    pub instructions: Option<String>,
    pub protocol_version: String,
    pub request_timeout: Duration,
}

impl ServerConfig {
    #[must_use]
    pub fn new(info: Implementation) -> Self {
        let session = SessionConfig::default();
        Self {
            info,
            capabilities: ServerCapabilities::default(),
            instructions: None,
            protocol_version: session.protocol_version,
            request_timeout: session.request_timeout,
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

struct ServerInner {
    config: ServerConfig,
    transport: Arc<dyn Transport>,
    peers: Arc<PeerManager>,
    coordinator: Coordinator,
    tools: ToolManager,
    resources: ResourceManager,
    prompts: PromptManager,
    completions: CompletionManager,
    callbacks: ServerCallbacks,
}

/// An MCP server session over any transport. Clones share the session, so
/// a tool handler can hold one to report progress mid-call.
#[derive(Clone)]
pub struct ServerSession {
    inner: Arc<ServerInner>,
}

impl ServerSession {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: ServerConfig) -> Self {
        let peers = Arc::new(PeerManager::new());
        let coordinator = Coordinator::new(Arc::clone(&transport), Arc::clone(&peers));

        let inner = Arc::new(ServerInner {
            config,
            transport,
            peers,
            coordinator,
            tools: ToolManager::default(),
            resources: ResourceManager::default(),
            prompts: PromptManager::default(),
            completions: CompletionManager::default(),
            callbacks: ServerCallbacks::default(),
        });
        register_handlers(&inner);

        Self { inner }
    }

    // ================================
    // Lifecycle
    // ================================

    /// Begin accepting and processing client messages.
    pub fn start(&self) -> SessionResult<()> {
        self.inner.coordinator.start()
    }

    /// Stop message processing and clean up every client's request tables.
    pub async fn stop(&self) {
        self.inner.coordinator.stop().await;
    }

    /// Disconnect one client: cancel its in-flight work, tear down the
    /// transport connection, drop its state. Failed steps are logged and
    /// never block later ones.
    pub async fn disconnect_client(&self, client: &PeerId) {
        self.inner.peers.cleanup_peer(client);
        if let Err(e) = self.inner.transport.disconnect(client).await {
            tracing::warn!(client = %client, error = %e, "Transport disconnect failed");
        }
        self.inner.peers.remove_peer(client);
    }

    /// Stop the session entirely and close the transport.
    pub async fn shutdown(&self) {
        self.inner.coordinator.stop().await;
        for client in self.inner.peers.peer_ids() {
            if let Err(e) = self.inner.transport.disconnect(&client).await {
                tracing::warn!(client = %client, error = %e, "Transport disconnect failed");
            }
            self.inner.peers.remove_peer(&client);
        }
        self.inner.transport.close().await;
    }

    /// True once at least one client has completed the handshake.
    #[must_use]
    pub fn has_initialized_clients(&self) -> bool {
        self.inner.peers.peer_ids().iter().any(|c| self.inner.peers.is_initialized(c))
    }

    // ================================
    // Domain registries
    // ================================

    #[must_use]
    pub fn tools(&self) -> &ToolManager {
        &self.inner.tools
    }

    #[must_use]
    pub fn resources(&self) -> &ResourceManager {
        &self.inner.resources
    }

    #[must_use]
    pub fn prompts(&self) -> &PromptManager {
        &self.inner.prompts
    }

    #[must_use]
    pub fn completions(&self) -> &CompletionManager {
        &self.inner.completions
    }

    #[must_use]
    pub fn callbacks(&self) -> &ServerCallbacks {
        &self.inner.callbacks
    }

    #[must_use]
    pub fn peers(&self) -> &Arc<PeerManager> {
        &self.inner.peers
    }

    // ================================
    // Server -> client calls
    // ================================

    pub async fn ping(&self, client: &PeerId) -> SessionResult<()> {
        let request = Request::Ping(crate::protocol::common::PingParams::default());
        self.inner.request(client, request).await.map(|_| ())
    }

    /// Fetch the client's filesystem roots. Requires the client to have
    /// advertised the `roots` capability.
    pub async fn list_roots(&self, client: &PeerId) -> SessionResult<ListRootsResult> {
        self.inner.require_client_capability(client, "roots", |caps| caps.roots.is_some())?;
        match self.inner.request(client, Request::ListRoots(ListRootsParams::default())).await? {
            ProtocolResult::ListRoots(result) => {
                self.inner
                    .peers
                    .with_peer(client, |state| state.roots = Some(result.roots.clone()));
                Ok(result)
            }
            other => {
                Err(SessionError::UnexpectedResult { expected: "roots/list", got: other.kind() })
            }
        }
    }

    /// Ask the client's host to sample an LLM. Requires the `sampling`
    /// capability.
    pub async fn create_message(
        &self,
        client: &PeerId,
        params: CreateMessageParams,
    ) -> SessionResult<CreateMessageResult> {
        self.inner.require_client_capability(client, "sampling", |caps| caps.sampling)?;
        match self.inner.request(client, Request::CreateMessage(params)).await? {
            ProtocolResult::CreateMessage(result) => Ok(result),
            other => Err(SessionError::UnexpectedResult {
                expected: "sampling/createMessage",
                got: other.kind(),
            }),
        }
    }

    /// Ask the client to elicit input from the user. Requires the
    /// `elicitation` capability.
    pub async fn elicit(&self, client: &PeerId, params: ElicitParams) -> SessionResult<ElicitResult> {
        self.inner.require_client_capability(client, "elicitation", |caps| caps.elicitation)?;
        match self.inner.request(client, Request::Elicit(params)).await? {
            ProtocolResult::Elicit(result) => Ok(result),
            other => Err(SessionError::UnexpectedResult {
                expected: "elicitation/create",
                got: other.kind(),
            }),
        }
    }

    // ================================
    // Server -> client notifications
    // ================================

    /// Emit a log record to one client, honoring its `logging/setLevel`
    /// filter. Below-threshold messages are silently dropped.
    pub async fn log_message(
        &self,
        client: &PeerId,
        level: LoggingLevel,
        logger: Option<String>,
        data: serde_json::Value,
    ) -> SessionResult<()> {
        let minimum = self.inner.peers.with_peer(client, |state| state.log_level).flatten();
        if minimum.is_some_and(|min| level < min) {
            return Ok(());
        }
        let notification = Notification::Message(LoggingMessageParams { level, logger, data });
        self.inner.coordinator.send_notification(client, notification).await
    }

    /// Report progress on the request a handler is currently serving.
    ///
    /// The frame is correlated to the in-flight request, so on the
    /// Streamable HTTP transport it rides the SSE stream that request
    /// opened rather than needing a separate server stream.
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

    /// Broadcast `tools/list_changed` to every initialized client.
    pub async fn notify_tools_list_changed(&self) {
        self.broadcast(Notification::ToolListChanged).await;
    }

    /// Broadcast `resources/list_changed` to every initialized client.
    pub async fn notify_resources_list_changed(&self) {
        self.broadcast(Notification::ResourceListChanged).await;
    }

    /// Broadcast `prompts/list_changed` to every initialized client.
    pub async fn notify_prompts_list_changed(&self) {
        self.broadcast(Notification::PromptListChanged).await;
    }

    /// Tell every client subscribed to a resource that it changed.
    pub async fn notify_resource_updated(&self, uri: &str) {
        for client in self.inner.peers.peer_ids() {
            let subscribed = self
                .inner
                .peers
                .with_peer(&client, |state| state.subscriptions.contains(uri))
                .unwrap_or(false);
            if !subscribed {
                continue;
            }
            let notification = Notification::ResourceUpdated(
                crate::protocol::resources::ResourceUpdatedParams { uri: uri.to_string() },
            );
            if let Err(e) = self.inner.coordinator.send_notification(&client, notification).await {
                tracing::warn!(client = %client, uri = %uri, error = %e, "Failed to notify resource update");
            }
        }
    }

    async fn broadcast(&self, notification: Notification) {
        for client in self.inner.peers.peer_ids() {
            if !self.inner.peers.is_initialized(&client) {
                continue;
            }
            if let Err(e) =
                self.inner.coordinator.send_notification(&client, notification.clone()).await
            {
                tracing::warn!(client = %client, method = %notification.method(), error = %e, "Broadcast failed");
            }
        }
    }
}

// ================================
// Inbound handlers
// ================================

fn register_handlers(inner: &Arc<ServerInner>) {
    use crate::coordinator::{HandlerFuture, NotificationHandler, RequestHandler};
    use std::sync::Weak;

    fn request_handler(
        inner: &Arc<ServerInner>,
        f: fn(
            Arc<ServerInner>,
            RequestContext,
            Request,
        ) -> HandlerFuture<Result<ProtocolResult, RpcError>>,
    ) -> RequestHandler {
        let weak: Weak<ServerInner> = Arc::downgrade(inner);
        Arc::new(move |ctx, request| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return Err(RpcError::internal("Session closed"));
                };
                f(inner, ctx, request).await
            })
        })
    }

    fn notification_handler(
        inner: &Arc<ServerInner>,
        f: fn(Arc<ServerInner>, PeerId, Notification) -> HandlerFuture<()>,
    ) -> NotificationHandler {
        let weak: Weak<ServerInner> = Arc::downgrade(inner);
        Arc::new(move |peer, notification| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    f(inner, peer, notification).await;
                }
            })
        })
    }

    let c = &inner.coordinator;

    c.register_request_handler(
        methods::PING,
        Arc::new(|_ctx, _request| Box::pin(async { Ok(ProtocolResult::Empty) })),
    );
    c.register_request_handler(
        methods::INITIALIZE,
        request_handler(inner, |inner, ctx, request| {
            Box::pin(async move { inner.handle_initialize(&ctx.peer, request) })
        }),
    );
    c.register_request_handler(
        methods::TOOLS_LIST,
        request_handler(inner, |inner, _ctx, _request| {
            Box::pin(async move {
                inner.require_capability("tools", inner.config.capabilities.tools.is_some())?;
                Ok(ProtocolResult::ListTools(inner.tools.handle_list()))
            })
        }),
    );
    c.register_request_handler(
        methods::TOOLS_CALL,
        request_handler(inner, |inner, ctx, request| {
            Box::pin(async move {
                inner.require_capability("tools", inner.config.capabilities.tools.is_some())?;
                let Request::CallTool(params) = request else {
                    return Err(RpcError::internal("Mismatched request variant"));
                };
                inner.tools.handle_call(ctx, params).await.map(ProtocolResult::CallTool)
            })
        }),
    );
    c.register_request_handler(
        methods::RESOURCES_LIST,
        request_handler(inner, |inner, _ctx, _request| {
            Box::pin(async move {
                inner
                    .require_capability("resources", inner.config.capabilities.resources.is_some())?;
                Ok(ProtocolResult::ListResources(inner.resources.handle_list()))
            })
        }),
    );
    c.register_request_handler(
        methods::RESOURCES_TEMPLATES_LIST,
        request_handler(inner, |inner, _ctx, _request| {
            Box::pin(async move {
                inner
                    .require_capability("resources", inner.config.capabilities.resources.is_some())?;
                Ok(ProtocolResult::ListResourceTemplates(inner.resources.handle_list_templates()))
            })
        }),
    );
    c.register_request_handler(
        methods::RESOURCES_READ,
        request_handler(inner, |inner, ctx, request| {
            Box::pin(async move {
                inner
                    .require_capability("resources", inner.config.capabilities.resources.is_some())?;
                let Request::ReadResource(params) = request else {
                    return Err(RpcError::internal("Mismatched request variant"));
                };
                inner.resources.handle_read(ctx, params).await.map(ProtocolResult::ReadResource)
            })
        }),
    );
    c.register_request_handler(
        methods::RESOURCES_SUBSCRIBE,
        request_handler(inner, |inner, ctx, request| {
            Box::pin(async move {
                inner.require_capability(
                    "resources.subscribe",
                    inner.config.capabilities.supports_subscribe(),
                )?;
                let Request::Subscribe(params) = request else {
                    return Err(RpcError::internal("Mismatched request variant"));
                };
                if !inner.resources.knows(&params.uri) {
                    return Err(RpcError::invalid_params(format!(
                        "Unknown resource: {}",
                        params.uri
                    )));
                }
                inner.peers.with_peer(&ctx.peer, |state| {
                    state.subscriptions.insert(params.uri.clone());
                });
                Ok(ProtocolResult::Empty)
            })
        }),
    );
    c.register_request_handler(
        methods::RESOURCES_UNSUBSCRIBE,
        request_handler(inner, |inner, ctx, request| {
            Box::pin(async move {
                inner.require_capability(
                    "resources.subscribe",
                    inner.config.capabilities.supports_subscribe(),
                )?;
                let Request::Unsubscribe(params) = request else {
                    return Err(RpcError::internal("Mismatched request variant"));
                };
                inner.peers.with_peer(&ctx.peer, |state| {
                    state.subscriptions.remove(&params.uri);
                });
                Ok(ProtocolResult::Empty)
            })
        }),
    );
    c.register_request_handler(
        methods::PROMPTS_LIST,
        request_handler(inner, |inner, _ctx, _request| {
            Box::pin(async move {
                inner.require_capability("prompts", inner.config.capabilities.prompts.is_some())?;
                Ok(ProtocolResult::ListPrompts(inner.prompts.handle_list()))
            })
        }),
    );
    c.register_request_handler(
        methods::PROMPTS_GET,
        request_handler(inner, |inner, ctx, request| {
            Box::pin(async move {
                inner.require_capability("prompts", inner.config.capabilities.prompts.is_some())?;
                let Request::GetPrompt(params) = request else {
                    return Err(RpcError::internal("Mismatched request variant"));
                };
                inner.prompts.handle_get(ctx, params).await.map(ProtocolResult::GetPrompt)
            })
        }),
    );
    c.register_request_handler(
        methods::COMPLETION_COMPLETE,
        request_handler(inner, |inner, ctx, request| {
            Box::pin(async move {
                inner.require_capability(
                    "completions",
                    inner.config.capabilities.supports_completions(),
                )?;
                let Request::Complete(params) = request else {
                    return Err(RpcError::internal("Mismatched request variant"));
                };
                inner.completions.handle_complete(ctx, params).await.map(ProtocolResult::Complete)
            })
        }),
    );
    c.register_request_handler(
        methods::LOGGING_SET_LEVEL,
        request_handler(inner, |inner, ctx, request| {
            Box::pin(async move {
                inner
                    .require_capability("logging", inner.config.capabilities.supports_logging())?;
                let Request::SetLevel(params) = request else {
                    return Err(RpcError::internal("Mismatched request variant"));
                };
                inner.peers.with_peer(&ctx.peer, |state| state.log_level = Some(params.level));
                tracing::debug!(client = %ctx.peer, level = ?params.level, "Client set log level");
                Ok(ProtocolResult::Empty)
            })
        }),
    );

    c.register_notification_handler(
        methods::INITIALIZED,
        notification_handler(inner, |inner, peer, _notification| {
            Box::pin(async move {
                inner.peers.set_initialized(&peer);
                tracing::info!(client = %peer, "Client initialized");
                inner.callbacks.fire_initialized(&peer);
            })
        }),
    );
    c.register_notification_handler(
        methods::CANCELLED,
        notification_handler(inner, |inner, peer, notification| {
            Box::pin(async move {
                let Notification::Cancelled(params) = notification else { return };
                let cancelled = inner.coordinator.cancel_inbound(&peer, &params.request_id);
                tracing::debug!(client = %peer, id = %params.request_id, cancelled, "Client cancelled request");
                inner.callbacks.fire_cancelled(&peer, params);
            })
        }),
    );
    c.register_notification_handler(
        methods::PROGRESS,
        notification_handler(inner, |inner, peer, notification| {
            Box::pin(async move {
                let Notification::Progress(params) = notification else { return };
                inner.callbacks.fire_progress(&peer, params);
            })
        }),
    );
    c.register_notification_handler(
        methods::ROOTS_LIST_CHANGED,
        notification_handler(inner, |inner, peer, _notification| {
            Box::pin(async move { inner.handle_roots_list_changed(&peer).await })
        }),
    );
}

impl ServerInner {
    fn require_capability(&self, name: &str, advertised: bool) -> Result<(), RpcError> {
        if advertised {
            Ok(())
        } else {
            Err(RpcError::method_not_found(format!("Server does not support {name} capability")))
        }
    }

    fn require_client_capability(
        &self,
        client: &PeerId,
        name: &str,
        check: impl Fn(&ClientCapabilities) -> bool,
    ) -> SessionResult<()> {
        let supported = self
            .peers
            .capabilities(client)
            .as_ref()
            .and_then(PeerCapabilities::as_client)
            .is_some_and(check);
        if supported {
            Ok(())
        } else {
            Err(RpcError::method_not_found(format!("Client does not support {name} capability"))
                .into())
        }
    }

    async fn request(&self, client: &PeerId, request: Request) -> SessionResult<ProtocolResult> {
        let outcome =
            self.coordinator.send_request(client, request, self.config.request_timeout).await?;
        outcome.map_err(SessionError::from)
    }

    /// Answer `initialize`: reject mismatched protocol revisions (the
    /// coordinator disconnects the peer after that error goes out), store
    /// the client's identity otherwise.
    fn handle_initialize(&self, peer: &PeerId, request: Request) -> Result<ProtocolResult, RpcError> {
        let Request::Initialize(params) = request else {
            return Err(RpcError::internal("Mismatched request variant"));
        };

        if params.protocol_version != self.config.protocol_version {
            return Err(RpcError::version_mismatch(format!(
                "Unsupported protocol version: {}",
                params.protocol_version
            ))
            .with_data(json!({
                "supported": self.config.protocol_version,
                "requested": params.protocol_version,
            })));
        }

        self.peers.store_identity(
            peer,
            PeerCapabilities::Client(params.capabilities),
            params.client_info,
            params.protocol_version,
        );
        tracing::info!(client = %peer, "Client handshake accepted");

        Ok(ProtocolResult::Initialize(InitializeResult {
            protocol_version: self.config.protocol_version.clone(),
            capabilities: self.config.capabilities.clone(),
            server_info: self.config.info.clone(),
            instructions: self.config.instructions.clone(),
        }))
    }

    /// Refresh the client's roots projection. Failures must not disrupt the
    /// session.
    async fn handle_roots_list_changed(&self, peer: &PeerId) {
        let gated = self.require_client_capability(peer, "roots", |caps| caps.roots.is_some());
        if gated.is_err() {
            tracing::debug!(client = %peer, "Roots change from client without roots capability");
            return;
        }

        match self.request(peer, Request::ListRoots(ListRootsParams::default())).await {
            Ok(ProtocolResult::ListRoots(result)) => {
                self.peers.with_peer(peer, |state| state.roots = Some(result.roots.clone()));
                self.callbacks.fire_roots_changed(peer, result.roots);
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(client = %peer, error = %e, "Roots refresh failed; ignoring"),
        }
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("server", &self.inner.config.info.name)
            .field("clients", &self.inner.peers.peer_count())
            .finish()
    }
}
