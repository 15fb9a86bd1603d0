//! Agent loop states.

use serde::{Deserialize, Serialize};

/// Where a session's loop currently is.
///
/// `Idle` is the only initial state; `Complete`, `Failed` and `Cancelled`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    #[default]
    Idle,
    Planning,
    CallingModel,
    ExecutingTools,
    AwaitingApproval,
    Reflecting,
    Complete,
    Failed,
    Cancelled,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is an edge of the loop state machine.
    ///
    /// Any non-terminal state may fail or be cancelled.
    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Failed | Cancelled) {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Planning)
                | (Planning, CallingModel)
                | (CallingModel, ExecutingTools)
                | (CallingModel, Reflecting)
                | (CallingModel, Complete)
                | (ExecutingTools, AwaitingApproval)
                | (AwaitingApproval, ExecutingTools)
                | (ExecutingTools, Reflecting)
                | (Reflecting, CallingModel)
                | (Reflecting, Complete)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::CallingModel => "calling_model",
            Self::ExecutingTools => "executing_tools",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Reflecting => "reflecting",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
