//! # Cairn Core
//!
//! Domain types, collaborator traits, and error definitions for the cairn
//! assistant core. Every external system the loop talks to (completion
//! provider, tool providers, knowledge lookups) is a trait here;
//! implementations live in their own crates and everything depends inward.

pub mod error;
pub mod event;
pub mod evidence;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod text;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, KnowledgeError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use evidence::{EvidenceItem, EvidenceKind};
pub use knowledge::{KnowledgeHit, KnowledgeSource};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    EventStream, Provider, ProviderRequest, ProviderResponse, StopReason, StreamEvent,
    ToolDefinition, Usage,
};
pub use tool::{Tool, ToolKey, ToolProvider};
