//! Transport contract: the boundary between the session layer and wire I/O.
//!
//! A transport delivers framed JSON objects tagged with the peer they came
//! from, and sends frames addressed to a peer. Two concrete transports ship
//! with the crate:
//!
//! - [`stdio::StdioClientTransport`]: spawns server child processes and
//!   speaks line-delimited JSON over their pipes
//! - [`streamable`]: Streamable HTTP, server side (axum + SSE) and client
//!   side (reqwest POST + SSE listener)

pub mod stdio;
pub mod streamable;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::TransportResult;
use crate::peers::PeerId;
use crate::protocol::jsonrpc::RequestId;

/// One framed message received from a peer.
#[derive(Debug, Clone)]
pub struct PeerMessage {
    /// Which peer sent it.
    pub peer_id: PeerId,

    /// The raw decoded JSON frame (or batch array).
    pub payload: Value,

    /// When the transport dequeued it.
    pub received_at: DateTime<Utc>,
}

impl PeerMessage {
    /// Wrap a payload with its peer identity, stamped now.
    #[must_use]
    pub fn new(peer_id: PeerId, payload: Value) -> Self {
        Self { peer_id, payload, received_at: Utc::now() }
    }
}

/// Routing hints for an outbound frame.
///
/// The Streamable HTTP server uses `originating_request_id` to route a
/// response onto the SSE stream opened by the request that caused it.
#[derive(Debug, Clone, Default)]
pub struct TransportContext {
    pub originating_request_id: Option<RequestId>,
}

impl TransportContext {
    /// Context for a frame produced while handling the given request.
    #[must_use]
    pub fn for_request(id: RequestId) -> Self {
        Self { originating_request_id: Some(id) }
    }
}

/// Wire-level I/O for one session end.
///
/// Implementations own their I/O resources and multiplex any number of
/// peers. All methods take `&self`; implementations synchronize internally.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// True while the transport can move frames.
    fn is_open(&self) -> bool;

    /// Send one frame to a peer.
    async fn send(&self, peer: &PeerId, frame: Value, ctx: TransportContext)
    -> TransportResult<()>;

    /// Receive the next framed message from any peer. Returns `None` once
    /// the transport has closed; per-frame failures are handled internally.
    async fn recv(&self) -> Option<PeerMessage>;

    /// Tear down one peer's connection. Safe to call repeatedly.
    async fn disconnect(&self, peer: &PeerId) -> TransportResult<()>;

    /// Close the transport and release all resources. Safe to call
    /// repeatedly.
    async fn close(&self);
}
