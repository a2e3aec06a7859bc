//! Application callback registries.
//!
//! Callbacks are plain synchronous hooks invoked from notification handler
//! tasks. They are stored as values keyed by slot, never holding the
//! session, so the ownership graph stays a tree.

use std::sync::{Arc, RwLock};

use crate::peers::PeerId;
use crate::protocol::common::{CancelledParams, ProgressParams};
use crate::protocol::logging::LoggingMessageParams;
use crate::protocol::prompts::Prompt;
use crate::protocol::resources::{ReadResourceResult, Resource, ResourceTemplate};
use crate::protocol::roots::Root;
use crate::protocol::tools::Tool;

type Callback<T> = Arc<dyn Fn(&PeerId, T) + Send + Sync>;

struct Slot<T>(RwLock<Option<Callback<T>>>);

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(RwLock::new(None))
    }
}

impl<T> Slot<T> {
    fn set(&self, callback: impl Fn(&PeerId, T) + Send + Sync + 'static) {
        *self.0.write().expect("callback slot lock poisoned") = Some(Arc::new(callback));
    }

    fn fire(&self, peer: &PeerId, value: T) {
        let callback = self.0.read().expect("callback slot lock poisoned").clone();
        if let Some(callback) = callback {
            callback(peer, value);
        }
    }
}

/// Callbacks a client application can register for server-driven events.
#[derive(Default)]
pub struct ClientCallbacks {
    cancelled: Slot<CancelledParams>,
    progress: Slot<ProgressParams>,
    tools_changed: Slot<Vec<Tool>>,
    resources_changed: Slot<(Vec<Resource>, Vec<ResourceTemplate>)>,
    resource_updated: Slot<(String, ReadResourceResult)>,
    prompts_changed: Slot<Vec<Prompt>>,
    log_message: Slot<LoggingMessageParams>,
}

impl ClientCallbacks {
    pub fn on_cancelled(&self, f: impl Fn(&PeerId, CancelledParams) + Send + Sync + 'static) {
        self.cancelled.set(f);
    }

    pub fn on_progress(&self, f: impl Fn(&PeerId, ProgressParams) + Send + Sync + 'static) {
        self.progress.set(f);
    }

    pub fn on_tools_changed(&self, f: impl Fn(&PeerId, Vec<Tool>) + Send + Sync + 'static) {
        self.tools_changed.set(f);
    }

    pub fn on_resources_changed(
        &self,
        f: impl Fn(&PeerId, (Vec<Resource>, Vec<ResourceTemplate>)) + Send + Sync + 'static,
    ) {
        self.resources_changed.set(f);
    }

    pub fn on_resource_updated(
        &self,
        f: impl Fn(&PeerId, (String, ReadResourceResult)) + Send + Sync + 'static,
    ) {
        self.resource_updated.set(f);
    }

    pub fn on_prompts_changed(&self, f: impl Fn(&PeerId, Vec<Prompt>) + Send + Sync + 'static) {
        self.prompts_changed.set(f);
    }

    pub fn on_log_message(&self, f: impl Fn(&PeerId, LoggingMessageParams) + Send + Sync + 'static) {
        self.log_message.set(f);
    }

    pub(crate) fn fire_cancelled(&self, peer: &PeerId, params: CancelledParams) {
        self.cancelled.fire(peer, params);
    }

    pub(crate) fn fire_progress(&self, peer: &PeerId, params: ProgressParams) {
        self.progress.fire(peer, params);
    }

    pub(crate) fn fire_tools_changed(&self, peer: &PeerId, tools: Vec<Tool>) {
        self.tools_changed.fire(peer, tools);
    }

    pub(crate) fn fire_resources_changed(
        &self,
        peer: &PeerId,
        resources: Vec<Resource>,
        templates: Vec<ResourceTemplate>,
    ) {
        self.resources_changed.fire(peer, (resources, templates));
    }

    pub(crate) fn fire_resource_updated(&self, peer: &PeerId, uri: String, result: ReadResourceResult) {
        self.resource_updated.fire(peer, (uri, result));
    }

    pub(crate) fn fire_prompts_changed(&self, peer: &PeerId, prompts: Vec<Prompt>) {
        self.prompts_changed.fire(peer, prompts);
    }

    pub(crate) fn fire_log_message(&self, peer: &PeerId, params: LoggingMessageParams) {
        self.log_message.fire(peer, params);
    }
}

/// Callbacks a server application can register for client-driven events.
#[derive(Default)]
pub struct ServerCallbacks {
    initialized: Slot<()>,
    cancelled: Slot<CancelledParams>,
    progress: Slot<ProgressParams>,
    roots_changed: Slot<Vec<Root>>,
}

impl ServerCallbacks {
    pub fn on_initialized(&self, f: impl Fn(&PeerId, ()) + Send + Sync + 'static) {
        self.initialized.set(f);
    }

    pub fn on_cancelled(&self, f: impl Fn(&PeerId, CancelledParams) + Send + Sync + 'static) {
        self.cancelled.set(f);
    }

    pub fn on_progress(&self, f: impl Fn(&PeerId, ProgressParams) + Send + Sync + 'static) {
        self.progress.set(f);
    }

    pub fn on_roots_changed(&self, f: impl Fn(&PeerId, Vec<Root>) + Send + Sync + 'static) {
        self.roots_changed.set(f);
    }

    pub(crate) fn fire_initialized(&self, peer: &PeerId) {
        self.initialized.fire(peer, ());
    }

    pub(crate) fn fire_cancelled(&self, peer: &PeerId, params: CancelledParams) {
        self.cancelled.fire(peer, params);
    }

    pub(crate) fn fire_progress(&self, peer: &PeerId, params: ProgressParams) {
        self.progress.fire(peer, params);
    }

    pub(crate) fn fire_roots_changed(&self, peer: &PeerId, roots: Vec<Root>) {
        self.roots_changed.fire(peer, roots);
    }
}
