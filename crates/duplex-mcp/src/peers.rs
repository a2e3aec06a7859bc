//! Per-peer state and request tracking.
//!
//! One [`PeerState`] exists per connected peer (a server from the client's
//! view, a client from the server's view). It holds the negotiated protocol
//! state, domain projections, and the two request tables:
//!
//! - `outbound`: requests we sent, awaiting the correlated response
//! - `inbound`: requests we received, with the handler task running
//!
//! All operations serialize behind one cheap mutex; nothing awaits while
//! holding it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::protocol::initialization::{ClientCapabilities, Implementation, ServerCapabilities};
use crate::protocol::jsonrpc::{RequestId, RpcError};
use crate::protocol::logging::LoggingLevel;
use crate::protocol::prompts::Prompt;
use crate::protocol::requests::{Request, RpcOutcome};
use crate::protocol::resources::{Resource, ResourceTemplate};
use crate::protocol::roots::Root;
use crate::protocol::tools::Tool;

/// Opaque identifier of a remote endpoint within one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh peer id.
    #[must_use]
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Capabilities advertised by the peer, by role.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerCapabilities {
    Client(ClientCapabilities),
    Server(ServerCapabilities),
}

impl PeerCapabilities {
    #[must_use]
    pub fn as_client(&self) -> Option<&ClientCapabilities> {
        match self {
            Self::Client(caps) => Some(caps),
            Self::Server(_) => None,
        }
    }

    #[must_use]
    pub fn as_server(&self) -> Option<&ServerCapabilities> {
        match self {
            Self::Server(caps) => Some(caps),
            Self::Client(_) => None,
        }
    }
}

type OutboundEntry = (Request, oneshot::Sender<RpcOutcome>);
type InboundEntry = (Request, AbortHandle);

/// Complete state of one peer.
#[derive(Debug, Default)]
pub struct PeerState {
    // Protocol state
    pub capabilities: Option<PeerCapabilities>,
    pub info: Option<Implementation>,
    pub protocol_version: Option<String>,
    pub instructions: Option<String>,
    pub initialized: bool,

    // Domain projections. The coordinator never touches these; session-layer
    // notification handlers do.
    pub tools: Option<Vec<Tool>>,
    pub resources: Option<Vec<Resource>>,
    pub resource_templates: Option<Vec<ResourceTemplate>>,
    pub prompts: Option<Vec<Prompt>>,
    pub roots: Option<Vec<Root>>,
    pub subscriptions: HashSet<String>,
    pub log_level: Option<LoggingLevel>,

    // Request tracking
    outbound: HashMap<RequestId, OutboundEntry>,
    inbound: HashMap<RequestId, InboundEntry>,
}

/// The peer lookup failed; the operation requires a registered peer.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("Peer '{0}' is not registered")]
pub struct UnknownPeerError(pub String);

/// Owns all peer state and the request tables.
#[derive(Debug, Default)]
pub struct PeerManager {
    peers: Mutex<HashMap<PeerId, PeerState>>,
}

impl PeerManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PeerId, PeerState>> {
        self.peers.lock().expect("peer map lock poisoned")
    }

    /// Create the peer record if it does not exist yet.
    pub fn register(&self, peer: &PeerId) {
        self.lock().entry(peer.clone()).or_default();
    }

    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.lock().contains_key(peer)
    }

    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.lock().len()
    }

    /// Run a closure against one peer's state. Returns `None` for unknown
    /// peers.
    pub fn with_peer<R>(&self, peer: &PeerId, f: impl FnOnce(&mut PeerState) -> R) -> Option<R> {
        self.lock().get_mut(peer).map(f)
    }

    // ================================
    // Protocol state
    // ================================

    /// Store the peer's identity from the handshake. Creates the record if
    /// needed; does not flip the initialized flag.
    pub fn store_identity(
        &self,
        peer: &PeerId,
        capabilities: PeerCapabilities,
        info: Implementation,
        protocol_version: impl Into<String>,
    ) {
        let mut peers = self.lock();
        let state = peers.entry(peer.clone()).or_default();
        state.capabilities = Some(capabilities);
        state.info = Some(info);
        state.protocol_version = Some(protocol_version.into());
    }

    /// Mark the peer initialized. Non-ping traffic is gated on this flag.
    pub fn set_initialized(&self, peer: &PeerId) {
        let mut peers = self.lock();
        peers.entry(peer.clone()).or_default().initialized = true;
    }

    #[must_use]
    pub fn is_initialized(&self, peer: &PeerId) -> bool {
        self.lock().get(peer).is_some_and(|state| state.initialized)
    }

    #[must_use]
    pub fn capabilities(&self, peer: &PeerId) -> Option<PeerCapabilities> {
        self.lock().get(peer).and_then(|state| state.capabilities.clone())
    }

    #[must_use]
    pub fn info(&self, peer: &PeerId) -> Option<Implementation> {
        self.lock().get(peer).and_then(|state| state.info.clone())
    }

    #[must_use]
    pub fn protocol_version(&self, peer: &PeerId) -> Option<String> {
        self.lock().get(peer).and_then(|state| state.protocol_version.clone())
    }

    // ================================
    // Outbound requests (we sent, awaiting response)
    // ================================

    /// Track an outbound request until its response arrives.
    pub fn track_outbound(
        &self,
        peer: &PeerId,
        id: RequestId,
        request: Request,
        sender: oneshot::Sender<RpcOutcome>,
    ) -> Result<(), UnknownPeerError> {
        let mut peers = self.lock();
        let state = peers.get_mut(peer).ok_or_else(|| UnknownPeerError(peer.to_string()))?;
        state.outbound.insert(id, (request, sender));
        Ok(())
    }

    /// The original request for a tracked outbound id, if any. Used to parse
    /// the correlated response.
    #[must_use]
    pub fn get_outbound_request(&self, peer: &PeerId, id: &RequestId) -> Option<Request> {
        self.lock().get(peer).and_then(|state| state.outbound.get(id)).map(|(req, _)| req.clone())
    }

    /// Complete the tracked future with the response and remove the entry.
    /// Unknown ids are a no-op (safe against the timeout race).
    pub fn resolve_outbound(&self, peer: &PeerId, id: &RequestId, outcome: RpcOutcome) {
        let entry = self.lock().get_mut(peer).and_then(|state| state.outbound.remove(id));
        if let Some((_, sender)) = entry {
            // Receiver may already be gone (caller timed out); that's fine.
            let _ = sender.send(outcome);
        }
    }

    /// Remove an outbound entry. A still-pending future is completed with an
    /// internal error the caller never observes (it has already moved on).
    pub fn remove_outbound(&self, peer: &PeerId, id: &RequestId) {
        let entry = self.lock().get_mut(peer).and_then(|state| state.outbound.remove(id));
        if let Some((_, sender)) = entry {
            let _ = sender.send(Err(RpcError::internal("Request resolved internally by tracker")));
        }
    }

    #[must_use]
    pub fn outbound_count(&self, peer: &PeerId) -> usize {
        self.lock().get(peer).map_or(0, |state| state.outbound.len())
    }

    // ================================
    // Inbound requests (we received, handler running)
    // ================================

    /// Track an inbound request while its handler task runs.
    pub fn track_inbound(
        &self,
        peer: &PeerId,
        id: RequestId,
        request: Request,
        handle: AbortHandle,
    ) -> Result<(), UnknownPeerError> {
        let mut peers = self.lock();
        let state = peers.get_mut(peer).ok_or_else(|| UnknownPeerError(peer.to_string()))?;
        state.inbound.insert(id, (request, handle));
        Ok(())
    }

    /// Cancel the handler task for an inbound request.
    ///
    /// Returns true if the id was tracked and the task had not yet finished.
    pub fn cancel_inbound(&self, peer: &PeerId, id: &RequestId) -> bool {
        let entry = self.lock().get_mut(peer).and_then(|state| state.inbound.remove(id));
        match entry {
            Some((_, handle)) => {
                let live = !handle.is_finished();
                handle.abort();
                live
            }
            None => false,
        }
    }

    /// Remove an inbound entry, cancelling the handler if still running.
    /// Idempotent.
    pub fn remove_inbound(&self, peer: &PeerId, id: &RequestId) {
        self.cancel_inbound(peer, id);
    }

    /// Drop an inbound entry without touching the handler. Used by the
    /// handler's own completion path.
    pub fn untrack_inbound(&self, peer: &PeerId, id: &RequestId) {
        let _ = self.lock().get_mut(peer).and_then(|state| state.inbound.remove(id));
    }

    #[must_use]
    pub fn inbound_count(&self, peer: &PeerId) -> usize {
        self.lock().get(peer).map_or(0, |state| state.inbound.len())
    }

    // ================================
    // Cleanup
    // ================================

    /// Clear both request tables for one peer: inbound handlers are
    /// cancelled, outbound futures complete with an internal error. The peer
    /// record itself stays.
    pub fn cleanup_peer(&self, peer: &PeerId) {
        let drained = {
            let mut peers = self.lock();
            peers.get_mut(peer).map(|state| {
                let outbound: Vec<OutboundEntry> = state.outbound.drain().map(|(_, e)| e).collect();
                let inbound: Vec<InboundEntry> = state.inbound.drain().map(|(_, e)| e).collect();
                (outbound, inbound)
            })
        };

        let Some((outbound, inbound)) = drained else { return };

        for (_, handle) in inbound {
            handle.abort();
        }
        for (_, sender) in outbound {
            let _ = sender.send(Err(RpcError::internal(
                "Request failed: session stopped or peer disconnected",
            )));
        }
    }

    /// Apply [`Self::cleanup_peer`] to every peer.
    pub fn cleanup_all(&self) {
        for peer in self.peer_ids() {
            self.cleanup_peer(&peer);
        }
    }

    /// Clean up and drop the peer record entirely.
    pub fn remove_peer(&self, peer: &PeerId) {
        self.cleanup_peer(peer);
        self.lock().remove(peer);
    }
}
