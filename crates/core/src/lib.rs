//! # local-llm core
//!
//! Domain types, traits, and error definitions for the local-llm conversation
//! engine. Every other crate in the workspace depends inward on this one.
//!
//! ## Layout
//!
//! - [`message`]: the neutral conversation history and its content records
//! - [`provider`]: the chat-completions wire model and the `Provider` trait
//! - [`tool`]: the tool execution surface (`Tool`, `ToolRegistry`)
//! - [`event`]: in-process domain events (usage, tool runs, failures)
//! - [`error`]: provider-boundary and user-facing error kinds

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{AttachmentError, ConversationError, ProviderError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{
    AttachmentRef, ContentRecord, ConversationHistory, ConversationId, Role, ToolCallRequest,
};
pub use provider::{ChatChunk, ChatRequest, ChunkStream, DeltaEvent, Provider, WireMessage};
pub use tool::{Tool, ToolDefinition, ToolRegistry};
