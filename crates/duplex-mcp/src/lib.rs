//! Bidirectional MCP session runtime.
//!
//! A Model Context Protocol endpoint speaks a JSON-RPC 2.0 dialect over a
//! pluggable transport. This crate provides the full message lifecycle:
//! connecting, negotiating capabilities, routing inbound requests to
//! handlers, tracking outbound requests until their responses arrive,
//! enforcing timeouts, propagating cancellation, and cleaning up on
//! disconnect.
//!
//! # Layers
//!
//! - **Protocol models** ([`protocol`]): JSON-RPC framing plus typed
//!   request/notification/result variants for the MCP method vocabulary
//! - **Peer state** ([`peers`]): per-peer capabilities, initialization
//!   flag, domain projections, and the two request-tracking tables
//! - **Coordinator** ([`coordinator`]): the receive loop, dispatch, and
//!   response correlation
//! - **Transports** ([`transport`]): stdio child processes and Streamable
//!   HTTP with SSE
//! - **Sessions** ([`session`]): the client and server facades
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use duplex_mcp::peers::PeerId;
//! use duplex_mcp::protocol::Implementation;
//! use duplex_mcp::session::{ClientConfig, ClientSession};
//! use duplex_mcp::transport::stdio::StdioClientTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(StdioClientTransport::new());
//!     transport.add_server("files", vec!["my-mcp-server".to_string()]).await?;
//!
//!     let config = ClientConfig::new(Implementation::new("my-client", "0.1.0"));
//!     let session = ClientSession::new(transport, config);
//!
//!     let server = PeerId::from("files");
//!     session.initialize(&server).await?;
//!     let tools = session.list_tools(&server).await?;
//!     println!("{} tools", tools.tools.len());
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod peers;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::{HttpServerConfig, OriginPolicy, SessionConfig};
pub use coordinator::{Coordinator, RequestContext};
pub use error::{SessionError, SessionResult, TransportError, TransportResult};
pub use peers::{PeerCapabilities, PeerId, PeerManager};
pub use protocol::{Notification, ProtocolResult, Request, RequestId, RpcError, RpcOutcome};
pub use session::{ClientConfig, ClientSession, ServerConfig, ServerSession};
pub use transport::{PeerMessage, Transport, TransportContext};
