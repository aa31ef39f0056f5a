//! # Tiller Core
//!
//! Domain types, traits, and error definitions for the Tiller agentic
//! orchestration engine. This crate has **zero framework dependencies** —
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here: the Tool
//! Backend that mutates the workspace, the Model Provider that generates
//! tool calls, and the Knowledge Store that persists what the agent has
//! learned. Implementations live in their respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod backend;
pub mod error;
pub mod event;
pub mod provider;
pub mod store;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use backend::{
    OperationKind, PendingOperation, PendingStatus, TargetIndex, ToolBackend, ToolOutcome,
    ToolSchema,
};
pub use error::{BackendError, EngineError, Error, MemoryError, ProviderError, Result, StoreError};
pub use event::{EventBus, OrchestratorEvent};
pub use provider::{ModelProvider, ModelRequest, ModelResponse, Usage};
pub use store::{DecisionPattern, KnowledgeFact, KnowledgeStore, ProjectKnowledge};
pub use turn::{TaskId, ToolCall, ToolRecord, Turn};
