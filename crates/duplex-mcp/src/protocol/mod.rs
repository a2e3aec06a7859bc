//! Protocol models: JSON-RPC framing plus the typed MCP method vocabulary.
//!
//! `jsonrpc` holds the wire codec and classifier; `requests` holds the
//! request/notification/result sum types; the remaining modules hold the
//! per-domain message shapes.

pub mod common;
pub mod completion;
pub mod elicitation;
pub mod initialization;
pub mod jsonrpc;
pub mod logging;
pub mod meta;
pub mod prompts;
pub mod requests;
pub mod resources;
pub mod roots;
pub mod sampling;
pub mod tools;

pub use common::{CancelledParams, EmptyResult, PingParams, ProgressParams, Role};
pub use initialization::{
    ClientCapabilities, Implementation, InitializeParams, InitializeResult, ServerCapabilities,
};
pub use jsonrpc::{classify, FrameKind, RequestId, RpcError};
pub use meta::{Meta, ProgressToken};
pub use requests::{methods, Notification, ProtocolResult, Request, RpcOutcome};
