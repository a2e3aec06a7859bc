//! Shared test helpers: an in-memory transport driven by the test body.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use duplex_mcp::error::{TransportError, TransportResult};
use duplex_mcp::peers::PeerId;
use duplex_mcp::transport::{PeerMessage, Transport, TransportContext};

/// Install a test subscriber once so failing tests show runtime logs
/// (`RUST_LOG=duplex_mcp=debug cargo test -- --nocapture`).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Channel-backed transport: tests inject inbound frames and inspect what
/// the coordinator sent.
pub struct MockTransport {
    open: AtomicBool,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<PeerMessage>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
    sent: Mutex<Vec<(PeerId, Value, TransportContext)>>,
    disconnected: Mutex<Vec<PeerId>>,
    fail_sends: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            open: AtomicBool::new(true),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
            sent: Mutex::new(Vec::new()),
            disconnected: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// Queue a frame as if the peer had sent it.
    pub fn inject(&self, peer: &str, frame: Value) {
        let sender = self.inbound_tx.lock().unwrap().clone();
        sender
            .expect("transport channel closed")
            .send(PeerMessage::new(PeerId::from(peer), frame))
            .expect("receiver alive");
    }

    /// Everything sent so far.
    pub fn sent_frames(&self) -> Vec<(PeerId, Value)> {
        self.sent.lock().unwrap().iter().map(|(p, v, _)| (p.clone(), v.clone())).collect()
    }

    /// Sent frames with their transport contexts.
    pub fn sent_with_context(&self) -> Vec<(PeerId, Value, Option<String>)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(p, v, c)| {
                (p.clone(), v.clone(), c.originating_request_id.as_ref().map(ToString::to_string))
            })
            .collect()
    }

    /// Poll until at least `n` frames have been sent (or panic after 2s).
    pub async fn wait_for_sent(&self, n: usize) -> Vec<(PeerId, Value)> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let frames = self.sent_frames();
            if frames.len() >= n {
                return frames;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} sent frames; have {}",
                frames.len()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn peers_disconnected(&self) -> Vec<PeerId> {
        self.disconnected.lock().unwrap().clone()
    }

    /// Make every send fail with a transport error.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Simulate the remote end going away: the receive loop sees EOF.
    pub fn drop_inbound(&self) {
        self.inbound_tx.lock().unwrap().take();
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, peer: &PeerId, frame: Value, ctx: TransportContext) -> TransportResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sent.lock().unwrap().push((peer.clone(), frame, ctx));
        Ok(())
    }

    async fn recv(&self) -> Option<PeerMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn disconnect(&self, peer: &PeerId) -> TransportResult<()> {
        self.disconnected.lock().unwrap().push(peer.clone());
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.inbound_tx.lock().unwrap().take();
    }
}

/// One end of an in-memory wire: frames sent here arrive at the other end,
/// tagged with this end's identity.
pub struct LoopbackTransport {
    open: AtomicBool,
    /// How the remote end addresses us.
    identity: PeerId,
    outbound: Mutex<Option<mpsc::UnboundedSender<PeerMessage>>>,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
}

/// A connected pair of loopback transports for full client/server tests.
pub fn loopback_pair(left_identity: &str, right_identity: &str) -> (Arc<LoopbackTransport>, Arc<LoopbackTransport>) {
    let (left_tx, right_rx) = mpsc::unbounded_channel();
    let (right_tx, left_rx) = mpsc::unbounded_channel();
    let left = Arc::new(LoopbackTransport {
        open: AtomicBool::new(true),
        identity: PeerId::from(left_identity),
        outbound: Mutex::new(Some(left_tx)),
        inbound: tokio::sync::Mutex::new(left_rx),
    });
    let right = Arc::new(LoopbackTransport {
        open: AtomicBool::new(true),
        identity: PeerId::from(right_identity),
        outbound: Mutex::new(Some(right_tx)),
        inbound: tokio::sync::Mutex::new(right_rx),
    });
    (left, right)
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, _peer: &PeerId, frame: Value, _ctx: TransportContext) -> TransportResult<()> {
        let sender = self.outbound.lock().unwrap().clone();
        sender
            .ok_or(TransportError::Closed)?
            .send(PeerMessage::new(self.identity.clone(), frame))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Option<PeerMessage> {
        self.inbound.lock().await.recv().await
    }

    async fn disconnect(&self, _peer: &PeerId) -> TransportResult<()> {
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.outbound.lock().unwrap().take();
    }
}
