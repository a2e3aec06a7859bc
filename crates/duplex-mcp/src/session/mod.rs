//! Session facades: the client and server surfaces over the coordinator.

pub mod callbacks;
pub mod client;
pub mod managers;
pub mod server;

pub use callbacks::{ClientCallbacks, ServerCallbacks};
pub use client::{ClientConfig, ClientSession, ElicitationHandler, SamplingHandler};
pub use managers::{
    CompletionHandler, CompletionManager, PromptHandler, PromptManager, ResourceManager,
    ResourceReadHandler, ToolHandler, ToolManager,
};
pub use server::{ServerConfig, ServerSession};
