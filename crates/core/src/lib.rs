//! # Colloquy Core
//!
//! Domain types, traits, and error definitions for the Colloquy agent
//! runtime. It defines the domain model that all other crates implement
//! against; the only runtime machinery here is the broadcast event bus.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model backend, tool execution, relevance
//! scoring, transcript storage) is defined as a trait here. Implementations
//! live in host code or in `colloquy-runtime`. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod event;
pub mod gateway;
pub mod provider;
pub mod scorer;
pub mod store;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use error::{Error, FailedAttempt, ProviderError, Result, RoutingError, StoreError};
pub use event::{EventBus, RuntimeEvent};
pub use gateway::{ToolCall, ToolGateway, ToolResult};
pub use provider::{ChatRequest, ChatResponse, ModelProvider, ToolSpec, Usage};
pub use scorer::RelevanceScorer;
pub use store::TranscriptStore;
pub use turn::{ConversationId, Role, SenderId, Transcript, Turn};
