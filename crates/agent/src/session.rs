//! Per-session loop state and the outcome handed back to the host.

use std::path::PathBuf;
use std::sync::Arc;

use holdfast_core::agent::AgentState;
use holdfast_core::event::{AgentEvent, EventBus};
use holdfast_core::message::{Conversation, SessionId};
use holdfast_core::todo::{TodoLedger, TodoProgress};
use holdfast_workflow::ActiveWorkflow;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::prompt::AgentMode;
use crate::tracker::ExecutionTracker;

/// What the host asks a loop to do.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub request: String,
    pub project_root: PathBuf,
    pub mode: AgentMode,
    /// Files the user has open, listed in the system prompt
    pub open_files: Vec<String>,
}

impl SessionConfig {
    pub fn new(request: impl Into<String>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            request: request.into(),
            project_root: project_root.into(),
            mode: AgentMode::Agent,
            open_files: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: AgentMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_open_files(mut self, files: Vec<String>) -> Self {
        self.open_files = files;
        self
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub success: bool,
    pub state: AgentState,
    pub iterations: u32,
    pub tool_calls: u32,
    pub final_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub max_iterations_reached: bool,
    /// Accepted although completion checks still failed
    pub caveated: bool,
    pub progress: TodoProgress,
}

/// Mutable state of one running session. Owned by the loop task.
pub(crate) struct AgentSession {
    pub id: SessionId,
    pub state: AgentState,
    pub iteration: u32,
    pub tool_calls: u32,
    pub conversation: Conversation,
    pub todos: Arc<TodoLedger>,
    pub workflow: Option<ActiveWorkflow>,
    pub gate_retries: u32,
    pub todo_retries: u32,
    pub stall_count: u32,
    /// Leading window of the last answer that came without tool calls
    pub last_no_tool_text: Option<String>,
    pub force_required: bool,
    pub gate_exhausted: bool,
    pub tracker: ExecutionTracker,
    pub cancel: CancellationToken,
}

impl AgentSession {
    pub fn new(id: SessionId, todos: Arc<TodoLedger>, cancel: CancellationToken) -> Self {
        Self {
            conversation: Conversation::new(id.clone()),
            id,
            state: AgentState::Idle,
            iteration: 0,
            tool_calls: 0,
            todos,
            workflow: None,
            gate_retries: 0,
            todo_retries: 0,
            stall_count: 0,
            last_no_tool_text: None,
            force_required: false,
            gate_exhausted: false,
            tracker: ExecutionTracker::new(),
            cancel,
        }
    }

    /// Move to `to` and announce it. Illegal moves are logged and ignored.
    pub fn transition(&mut self, to: AgentState, bus: &EventBus) -> bool {
        let from = self.state;
        if from == to {
            return true;
        }
        if !from.can_transition_to(to) {
            warn!(
                session = %self.id.as_str(),
                from = from.as_str(),
                to = to.as_str(),
                "Illegal state transition ignored"
            );
            return false;
        }
        debug!(session = %self.id.as_str(), from = from.as_str(), to = to.as_str(), "State changed");
        self.state = to;
        bus.publish(&self.id, AgentEvent::StateChanged { from, to });
        true
    }

    pub fn outcome(&self, final_text: String, error: Option<String>) -> LoopOutcome {
        LoopOutcome {
            success: self.state == AgentState::Complete,
            state: self.state,
            iterations: self.iteration,
            tool_calls: self.tool_calls,
            final_text,
            error,
            max_iterations_reached: false,
            caveated: false,
            progress: self.todos.progress(),
        }
    }
}
