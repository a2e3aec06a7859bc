//! Tests for the per-peer request tracker contract.

use std::time::Duration;

use duplex_mcp::peers::{PeerId, PeerManager};
use duplex_mcp::protocol::common::PingParams;
use duplex_mcp::protocol::jsonrpc::{RequestId, INTERNAL_ERROR};
use duplex_mcp::protocol::requests::{ProtocolResult, Request};
use tokio::sync::oneshot;

fn ping() -> Request {
    Request::Ping(PingParams::default())
}

async fn parked_task() -> tokio::task::JoinHandle<()> {
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(600)).await;
    })
}

// =============================================================================
// Outbound table
// =============================================================================

#[tokio::test]
async fn test_outbound_lifecycle() {
    let manager = PeerManager::new();
    let peer = PeerId::from("srv");
    manager.register(&peer);

    let (tx, rx) = oneshot::channel();
    let id = RequestId::from("r-1");
    manager.track_outbound(&peer, id.clone(), ping(), tx).unwrap();

    assert!(manager.get_outbound_request(&peer, &id).is_some());
    assert_eq!(manager.outbound_count(&peer), 1);

    manager.resolve_outbound(&peer, &id, Ok(ProtocolResult::Empty));
    assert!(manager.get_outbound_request(&peer, &id).is_none());
    assert_eq!(rx.await.unwrap().unwrap(), ProtocolResult::Empty);
}

#[tokio::test]
async fn test_resolve_unknown_id_is_noop() {
    let manager = PeerManager::new();
    let peer = PeerId::from("srv");
    manager.register(&peer);

    // Must not panic or create entries.
    manager.resolve_outbound(&peer, &RequestId::from("ghost"), Ok(ProtocolResult::Empty));
    assert_eq!(manager.outbound_count(&peer), 0);
}

#[tokio::test]
async fn test_remove_outbound_completes_with_tracker_error() {
    let manager = PeerManager::new();
    let peer = PeerId::from("srv");
    manager.register(&peer);

    let (tx, rx) = oneshot::channel();
    let id = RequestId::from("r-2");
    manager.track_outbound(&peer, id.clone(), ping(), tx).unwrap();
    manager.remove_outbound(&peer, &id);

    let err = rx.await.unwrap().unwrap_err();
    assert_eq!(err.code, INTERNAL_ERROR);
    assert!(err.message.contains("resolved internally by tracker"));

    // Idempotent.
    manager.remove_outbound(&peer, &id);
}

#[tokio::test]
async fn test_same_id_on_different_peers_is_independent() {
    let manager = PeerManager::new();
    let a = PeerId::from("a");
    let b = PeerId::from("b");
    manager.register(&a);
    manager.register(&b);

    let (tx_a, rx_a) = oneshot::channel();
    let (tx_b, _rx_b) = oneshot::channel();
    let id = RequestId::from("shared");
    manager.track_outbound(&a, id.clone(), ping(), tx_a).unwrap();
    manager.track_outbound(&b, id.clone(), ping(), tx_b).unwrap();

    manager.resolve_outbound(&a, &id, Ok(ProtocolResult::Empty));
    assert!(rx_a.await.unwrap().is_ok());
    assert_eq!(manager.outbound_count(&b), 1);
}

// =============================================================================
// Inbound table
// =============================================================================

#[tokio::test]
async fn test_inbound_cancel_and_idempotent_remove() {
    let manager = PeerManager::new();
    let peer = PeerId::from("cli");
    manager.register(&peer);

    let task = parked_task().await;
    let id = RequestId::from("in-1");
    manager.track_inbound(&peer, id.clone(), ping(), task.abort_handle()).unwrap();

    assert!(manager.cancel_inbound(&peer, &id));
    assert!(task.await.unwrap_err().is_cancelled());

    // Removed on cancel; further removes are no-ops.
    manager.remove_inbound(&peer, &id);
    assert!(!manager.cancel_inbound(&peer, &id));
}

#[tokio::test]
async fn test_untrack_inbound_leaves_task_running() {
    let manager = PeerManager::new();
    let peer = PeerId::from("cli");
    manager.register(&peer);

    let task = tokio::spawn(async { 42 });
    let id = RequestId::from("in-2");
    manager
        .track_inbound(&peer, id.clone(), ping(), task.abort_handle())
        .unwrap();

    manager.untrack_inbound(&peer, &id);
    assert_eq!(manager.inbound_count(&peer), 0);
    assert_eq!(task.await.unwrap(), 42);
}

// =============================================================================
// Cleanup
// =============================================================================

#[tokio::test]
async fn test_cleanup_all_spans_every_peer() {
    let manager = PeerManager::new();
    let mut receivers = Vec::new();
    let mut tasks = Vec::new();

    for name in ["a", "b", "c"] {
        let peer = PeerId::from(name);
        manager.register(&peer);

        let (tx, rx) = oneshot::channel();
        manager.track_outbound(&peer, RequestId::from("out"), ping(), tx).unwrap();
        receivers.push(rx);

        let task = parked_task().await;
        manager.track_inbound(&peer, RequestId::from("in"), ping(), task.abort_handle()).unwrap();
        tasks.push(task);
    }

    manager.cleanup_all();

    for rx in receivers {
        assert!(rx.await.unwrap().is_err());
    }
    for task in tasks {
        assert!(task.await.unwrap_err().is_cancelled());
    }
    // Peer records themselves survive cleanup.
    assert_eq!(manager.peer_count(), 3);
}

#[tokio::test]
async fn test_remove_peer_drops_record() {
    let manager = PeerManager::new();
    let peer = PeerId::from("gone");
    manager.register(&peer);
    manager.remove_peer(&peer);
    assert!(!manager.contains(&peer));

    // Tracking against a removed peer fails.
    let (tx, _rx) = oneshot::channel();
    assert!(manager.track_outbound(&peer, RequestId::from("r"), ping(), tx).is_err());
}
