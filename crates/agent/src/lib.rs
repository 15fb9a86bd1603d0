//! The Holdfast agent loop: the controller that keeps a coding agent
//! working until the task is actually done.
//!
//! A session runs through these stages:
//!
//! 1. **Plan**: assemble the system prompt, replay session memory and pick
//!    a workflow for the request
//! 2. **Call the model**: stream one turn, compressing the context first
//!    when it nears the token budget
//! 3. **Act**: run requested tools, parking risky ones for approval
//! 4. **Reflect**: weigh an answer without tool calls against stalls, open
//!    todos and the completion gate, nudging the model back to work when
//!    it stops early
//!
//! The loop ends in `Complete`, `Failed` or `Cancelled`. Everything the
//! host sees arrives on the [`EventBus`](holdfast_core::EventBus).

pub mod approval;
pub mod context;
pub mod gate;
pub mod loop_runner;
pub mod nudge;
pub mod prompt;
pub mod session;
pub mod spawner;
pub mod stream;
pub mod tracker;

pub use approval::{ApprovalBroker, ApprovalDecision};
pub use context::{Compression, ContextCompressor};
pub use gate::{CompletionGate, GateVerdict};
pub use loop_runner::{AgentHandle, AgentLoop};
pub use prompt::{AgentMode, DefaultPromptAssembler, PromptAssembler, PromptRequest};
pub use session::{LoopOutcome, SessionConfig};
pub use spawner::LoopSpawner;
pub use stream::{collect_turn, ModelTurn};
pub use tracker::{CallKind, ExecutionTracker, ToolOutcome};
