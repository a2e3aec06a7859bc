//! Streamable HTTP transport: POST for inbound frames, SSE for outbound.
//!
//! The server side answers every MCP request over a freshly opened SSE
//! stream and gates all non-initialize traffic on the `Mcp-Session-Id`
//! cookie. The client side POSTs frames and drains whatever comes back.

pub mod client;
pub mod server;
pub mod streams;

pub use client::StreamableHttpClientTransport;
pub use server::StreamableHttpServerTransport;
pub use streams::{StreamManager, StreamFrame};
