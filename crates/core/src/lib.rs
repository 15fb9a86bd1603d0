//! # Holdfast Core
//!
//! Domain types, traits, and error definitions for the Holdfast coding-agent
//! loop. This crate defines the domain model that every other crate
//! implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the loop is a trait here: the model client, tools,
//! sub-agent spawning, and the stores. Implementations live in their
//! respective crates or in the host. This enables:
//! - Swapping implementations without touching the loop
//! - Easy testing with scripted/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod store;
pub mod todo;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::AgentState;
pub use error::{Error, ModelError, Result, StoreError, ToolError, ToolErrorCode};
pub use event::{AgentEvent, EventBus, EventEnvelope};
pub use message::{Conversation, Message, Role, SessionId};
pub use model::{ChatRequest, ChunkStream, ModelClient, StreamChunk, ToolChoice};
pub use store::{ExecutionHistory, HistoryStore, TodoStore};
pub use todo::{TodoBoard, TodoItem, TodoLedger, TodoProgress, TodoStatus, TodoUpdate, TransitionOutcome};
pub use tool::{
    RiskLevel, SubAgentSpawner, Tool, ToolCall, ToolContext, ToolDefinition, ToolFailure,
    ToolOutput, ToolRegistry, ToolResult,
};
