//! Server-side domain managers.
//!
//! Registries for the primitives a server exposes. Handlers receive the
//! request's call context so a tool or resource can behave per-client
//! (logging, access control) and report progress against the in-flight
//! request. Handlers should report expected failures in-band
//! (`CallToolResult::error`, descriptive resource text); anything they
//! return as `Err` goes on the wire as that error object.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::coordinator::{HandlerFuture, RequestContext};
use crate::protocol::completion::{CompleteParams, CompleteResult, Completion};
use crate::protocol::jsonrpc::RpcError;
use crate::protocol::prompts::{GetPromptParams, GetPromptResult, ListPromptsResult, Prompt};
use crate::protocol::resources::{
    ListResourceTemplatesResult, ListResourcesResult, ReadResourceParams, ReadResourceResult,
    Resource, ResourceTemplate,
};
use crate::protocol::tools::{CallToolParams, CallToolResult, ListToolsResult, Tool};

use std::sync::Arc;

/// Async handler executing one tool call.
pub type ToolHandler = Arc<
    dyn Fn(RequestContext, CallToolParams) -> HandlerFuture<Result<CallToolResult, RpcError>>
        + Send
        + Sync,
>;

/// Async handler reading one resource.
pub type ResourceReadHandler = Arc<
    dyn Fn(RequestContext, ReadResourceParams) -> HandlerFuture<Result<ReadResourceResult, RpcError>>
        + Send
        + Sync,
>;

/// Async handler resolving one prompt.
pub type PromptHandler = Arc<
    dyn Fn(RequestContext, GetPromptParams) -> HandlerFuture<Result<GetPromptResult, RpcError>>
        + Send
        + Sync,
>;

/// Async handler producing completion candidates.
pub type CompletionHandler = Arc<
    dyn Fn(RequestContext, CompleteParams) -> HandlerFuture<Result<CompleteResult, RpcError>>
        + Send
        + Sync,
>;

/// Registered tools and their handlers.
#[derive(Default)]
pub struct ToolManager {
    tools: RwLock<HashMap<String, (Tool, ToolHandler)>>,
}

impl ToolManager {
    /// Register a tool. Replaces any previous registration of the name.
    pub fn add_tool(&self, tool: Tool, handler: ToolHandler) {
        self.tools.write().expect("tool map lock poisoned").insert(tool.name.clone(), (tool, handler));
    }

    /// Remove a tool. Silently succeeds if absent.
    pub fn remove_tool(&self, name: &str) {
        self.tools.write().expect("tool map lock poisoned").remove(name);
    }

    /// All registered tool definitions, sorted by name.
    #[must_use]
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .read()
            .expect("tool map lock poisoned")
            .values()
            .map(|(tool, _)| tool.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub(crate) fn handle_list(&self) -> ListToolsResult {
        ListToolsResult { tools: self.tools(), next_cursor: None }
    }

    pub(crate) async fn handle_call(
        &self,
        ctx: RequestContext,
        params: CallToolParams,
    ) -> Result<CallToolResult, RpcError> {
        let handler = self
            .tools
            .read()
            .expect("tool map lock poisoned")
            .get(&params.name)
            .map(|(_, handler)| Arc::clone(handler));

        let Some(handler) = handler else {
            return Err(RpcError::invalid_params(format!("Unknown tool: {}", params.name)));
        };

        tracing::debug!(peer = %ctx.peer, tool = %params.name, "Executing tool");
        handler(ctx, params).await
    }
}

/// Registered resources, templates, and read handlers.
#[derive(Default)]
pub struct ResourceManager {
    resources: RwLock<HashMap<String, (Resource, ResourceReadHandler)>>,
    templates: RwLock<Vec<ResourceTemplate>>,
    /// Fallback handler for URIs not statically registered (template
    /// instantiations).
    fallback: RwLock<Option<ResourceReadHandler>>,
}

impl ResourceManager {
    /// Register a static resource with its read handler.
    pub fn add_resource(&self, resource: Resource, handler: ResourceReadHandler) {
        self.resources
            .write()
            .expect("resource map lock poisoned")
            .insert(resource.uri.clone(), (resource, handler));
    }

    /// Advertise a template. Reads of its instantiations go through the
    /// fallback handler.
    pub fn add_template(&self, template: ResourceTemplate) {
        self.templates.write().expect("template list lock poisoned").push(template);
    }

    /// Set the fallback read handler for dynamic URIs.
    pub fn set_fallback(&self, handler: ResourceReadHandler) {
        *self.fallback.write().expect("fallback lock poisoned") = Some(handler);
    }

    /// Remove a static resource. Silently succeeds if absent.
    pub fn remove_resource(&self, uri: &str) {
        self.resources.write().expect("resource map lock poisoned").remove(uri);
    }

    /// True if a read of this URI can be served.
    #[must_use]
    pub fn knows(&self, uri: &str) -> bool {
        self.resources.read().expect("resource map lock poisoned").contains_key(uri)
            || self.fallback.read().expect("fallback lock poisoned").is_some()
    }

    #[must_use]
    pub fn resources(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self
            .resources
            .read()
            .expect("resource map lock poisoned")
            .values()
            .map(|(resource, _)| resource.clone())
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    pub(crate) fn handle_list(&self) -> ListResourcesResult {
        ListResourcesResult { resources: self.resources(), next_cursor: None }
    }

    pub(crate) fn handle_list_templates(&self) -> ListResourceTemplatesResult {
        ListResourceTemplatesResult {
            resource_templates: self.templates.read().expect("template list lock poisoned").clone(),
            next_cursor: None,
        }
    }

    pub(crate) async fn handle_read(
        &self,
        ctx: RequestContext,
        params: ReadResourceParams,
    ) -> Result<ReadResourceResult, RpcError> {
        let handler = self
            .resources
            .read()
            .expect("resource map lock poisoned")
            .get(&params.uri)
            .map(|(_, handler)| Arc::clone(handler))
            .or_else(|| self.fallback.read().expect("fallback lock poisoned").clone());

        let Some(handler) = handler else {
            return Err(RpcError::invalid_params(format!("Unknown resource: {}", params.uri)));
        };

        tracing::debug!(peer = %ctx.peer, uri = %params.uri, "Reading resource");
        handler(ctx, params).await
    }
}

/// Registered prompts and their handlers.
#[derive(Default)]
pub struct PromptManager {
    prompts: RwLock<HashMap<String, (Prompt, PromptHandler)>>,
}

impl PromptManager {
    /// Register a prompt. Replaces any previous registration of the name.
    pub fn add_prompt(&self, prompt: Prompt, handler: PromptHandler) {
        self.prompts
            .write()
            .expect("prompt map lock poisoned")
            .insert(prompt.name.clone(), (prompt, handler));
    }

    /// Remove a prompt. Silently succeeds if absent.
    pub fn remove_prompt(&self, name: &str) {
        self.prompts.write().expect("prompt map lock poisoned").remove(name);
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<Prompt> {
        let mut prompts: Vec<Prompt> = self
            .prompts
            .read()
            .expect("prompt map lock poisoned")
            .values()
            .map(|(prompt, _)| prompt.clone())
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    pub(crate) fn handle_list(&self) -> ListPromptsResult {
        ListPromptsResult { prompts: self.prompts(), next_cursor: None }
    }

    pub(crate) async fn handle_get(
        &self,
        ctx: RequestContext,
        params: GetPromptParams,
    ) -> Result<GetPromptResult, RpcError> {
        let handler = self
            .prompts
            .read()
            .expect("prompt map lock poisoned")
            .get(&params.name)
            .map(|(_, handler)| Arc::clone(handler));

        let Some(handler) = handler else {
            return Err(RpcError::invalid_params(format!("Unknown prompt: {}", params.name)));
        };

        handler(ctx, params).await
    }
}

/// Optional completion handler.
#[derive(Default)]
pub struct CompletionManager {
    handler: RwLock<Option<CompletionHandler>>,
}

impl CompletionManager {
    pub fn set_handler(&self, handler: CompletionHandler) {
        *self.handler.write().expect("completion handler lock poisoned") = Some(handler);
    }

    pub(crate) async fn handle_complete(
        &self,
        ctx: RequestContext,
        params: CompleteParams,
    ) -> Result<CompleteResult, RpcError> {
        let handler = self.handler.read().expect("completion handler lock poisoned").clone();
        match handler {
            Some(handler) => handler(ctx, params).await,
            // Capability advertised but nothing configured: no candidates.
            None => Ok(CompleteResult {
                completion: Completion { values: Vec::new(), total: None, has_more: None },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new("cli", "req-1")
    }

    fn echo_tool() -> (Tool, ToolHandler) {
        let tool = Tool::new("echo", "Echo input back", json!({"type": "object"}));
        let handler: ToolHandler = Arc::new(|_ctx, params| {
            Box::pin(async move {
                let text = params
                    .arguments
                    .and_then(|a| a.get("text").and_then(|t| t.as_str()).map(str::to_string))
                    .unwrap_or_default();
                Ok(CallToolResult::text(text))
            })
        });
        (tool, handler)
    }

    #[tokio::test]
    async fn test_tool_dispatch() {
        let manager = ToolManager::default();
        let (tool, handler) = echo_tool();
        manager.add_tool(tool, handler);

        let result = manager
            .handle_call(
                ctx(),
                CallToolParams {
                    name: "echo".to_string(),
                    arguments: Some(json!({"text": "hi"})),
                    meta: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.content.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let manager = ToolManager::default();
        let err = manager
            .handle_call(
                ctx(),
                CallToolParams { name: "nope".to_string(), arguments: None, meta: None },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::protocol::jsonrpc::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_resource_fallback_serves_dynamic_uris() {
        let manager = ResourceManager::default();
        assert!(!manager.knows("file:///dynamic/a"));

        manager.set_fallback(Arc::new(|_ctx, params| {
            Box::pin(async move {
                Ok(ReadResourceResult {
                    contents: vec![crate::protocol::resources::ResourceContents::text(
                        params.uri, "generated",
                    )],
                })
            })
        }));
        assert!(manager.knows("file:///dynamic/a"));

        let result = manager
            .handle_read(
                ctx(),
                ReadResourceParams { uri: "file:///dynamic/a".to_string(), meta: None },
            )
            .await
            .unwrap();
        assert_eq!(result.contents.len(), 1);
    }

    #[test]
    fn test_listings_are_sorted() {
        let manager = ToolManager::default();
        let handler: ToolHandler =
            Arc::new(|_, _| Box::pin(async { Ok(CallToolResult::text("")) }));
        manager.add_tool(Tool::new("zeta", "", json!({})), Arc::clone(&handler));
        manager.add_tool(Tool::new("alpha", "", json!({})), handler);

        let names: Vec<String> = manager.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
