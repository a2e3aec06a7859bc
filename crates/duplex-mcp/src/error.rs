//! Error types for the MCP session runtime.
//!
//! Uses `thiserror` for structured error handling with automatic `From`
//! implementations. Wire-level JSON-RPC error objects are a separate type
//! ([`crate::protocol::RpcError`]) because they travel as data, not as Rust
//! errors; [`SessionError::Rpc`] bridges the two at the session surface.

use std::time::Duration;

use crate::protocol::jsonrpc::RpcError;

/// Errors from the transport layer.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The peer id has no registration.
    #[error("Peer '{peer}' is not registered")]
    UnknownPeer {
        /// Peer identifier that failed to resolve.
        peer: String,
    },

    /// The peer id is already registered.
    #[error("Peer '{peer}' is already registered")]
    AlreadyRegistered {
        /// Duplicate peer identifier.
        peer: String,
    },

    /// Connection details failed validation before any I/O.
    #[error("Invalid connection info: {0}")]
    InvalidConnectionInfo(String),

    /// Child process could not be spawned.
    #[error("Failed to spawn server '{peer}': {source}")]
    Spawn {
        /// Target server id.
        peer: String,
        /// Underlying spawn failure.
        #[source]
        source: std::io::Error,
    },

    /// The transport is closed.
    #[error("Transport is closed")]
    Closed,

    /// I/O failure while talking to a peer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The outbound message could not be serialized.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// HTTP request failure (connection, DNS, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server reported our session id as expired.
    #[error("Session expired for server '{server}'; re-initialize to continue")]
    SessionExpired {
        /// Server whose session lapsed.
        server: String,
    },

    /// The server does not support server-initiated streams.
    #[error("Server '{server}' does not support server streams (405)")]
    StreamsUnsupported {
        /// Server that rejected the GET stream.
        server: String,
    },

    /// No open stream is available to deliver the message.
    #[error("No active streams available for client '{client}'")]
    NoActiveStream {
        /// Client with no deliverable stream.
        client: String,
    },

    /// The peer returned an HTTP status outside the protocol contract.
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Response body or description.
        message: String,
    },
}

impl TransportError {
    /// Create an unknown-peer error.
    #[must_use]
    pub fn unknown_peer(peer: impl Into<String>) -> Self {
        Self::UnknownPeer { peer: peer.into() }
    }

    /// Create an already-registered error.
    #[must_use]
    pub fn already_registered(peer: impl Into<String>) -> Self {
        Self::AlreadyRegistered { peer: peer.into() }
    }

    /// Create an unexpected-status error.
    #[must_use]
    pub fn unexpected_status(status: u16, message: impl Into<String>) -> Self {
        Self::UnexpectedStatus { status, message: message.into() }
    }
}

/// Errors from the coordinator and session layer.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// Transport failure while sending or receiving.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The peer did not respond within the timeout.
    #[error("Request '{method}' timed out after {timeout:?}")]
    Timeout {
        /// Method of the abandoned request.
        method: String,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// Only `ping` and `initialize` may be sent before the handshake
    /// completes; anything else fails locally.
    #[error("Cannot send '{method}' to uninitialized peer; only ping and initialize are allowed")]
    NotInitialized {
        /// Method that was rejected.
        method: String,
    },

    /// The peer negotiated an incompatible protocol revision.
    #[error("Protocol version mismatch: ours={ours}, theirs={theirs}")]
    VersionMismatch {
        /// Version this side is configured for.
        ours: String,
        /// Version the peer advertised.
        theirs: String,
    },

    /// The peer answered a request with a JSON-RPC error object.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// The handshake failed for a reason other than a version mismatch.
    #[error("Initialization failed: {0}")]
    Handshake(String),

    /// A response decoded successfully but to the wrong result variant.
    #[error("Expected {expected} result, got {got}")]
    UnexpectedResult {
        /// Result variant the request called for.
        expected: &'static str,
        /// Result variant actually received.
        got: &'static str,
    },
}

impl SessionError {
    /// True if this error ends the session (the peer must re-initialize).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::VersionMismatch { .. } | Self::Transport(TransportError::Closed))
    }
}

/// Result type alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_mismatch_is_fatal() {
        let err = SessionError::VersionMismatch {
            ours: "2025-03-26".to_string(),
            theirs: "2024-11-05".to_string(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("2024-11-05"));
    }

    #[test]
    fn test_timeout_is_not_fatal() {
        let err = SessionError::Timeout {
            method: "tools/list".to_string(),
            timeout: Duration::from_millis(50),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_rpc_error_converts() {
        let err: SessionError = RpcError::method_not_found("nope").into();
        assert!(matches!(err, SessionError::Rpc(_)));
    }
}
