//! Agent events, the loop's only outward channel to the host.
//!
//! The loop publishes [`EventEnvelope`]s on an [`EventBus`]; hosts subscribe
//! and filter by session. Presentation is entirely the host's business.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::agent::AgentState;
use crate::message::SessionId;
use crate::tool::{RiskLevel, ToolCall, ToolResult};
use crate::todo::TodoProgress;

/// Everything the loop can tell the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StateChanged {
        from: AgentState,
        to: AgentState,
    },

    /// Free-form status line ("Compressing context", "Retrying", ...)
    ProgressNote {
        message: String,
    },

    /// Coalesced answer text
    StreamContent {
        text: String,
    },

    /// Coalesced reasoning text
    StreamReasoning {
        text: String,
    },

    ToolCallsReceived {
        iteration: u32,
        calls: Vec<ToolCall>,
    },

    ToolExecuting {
        call_id: String,
        tool_name: String,
    },

    ToolResult {
        result: ToolResult,
    },

    /// All calls of one model turn have run
    ToolsExecuted {
        iteration: u32,
        count: usize,
        failed: usize,
    },

    ApprovalNeeded {
        call_id: String,
        tool_name: String,
        risk: RiskLevel,
        arguments: serde_json::Value,
    },

    Complete {
        final_text: String,
        iterations: u32,
        tool_calls: u32,
        max_iterations_reached: bool,
        caveated: bool,
        progress: TodoProgress,
    },

    Error {
        message: String,
    },

    Cancelled,

    WorkflowStepUpdate {
        step_id: String,
        title: String,
        status: String,
        completed: usize,
        total: usize,
    },

    ContextCompressed {
        messages_before: usize,
        messages_after: usize,
        tokens_before: usize,
        tokens_after: usize,
    },
}

impl AgentEvent {
    /// Stable snake_case name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::ProgressNote { .. } => "progress_note",
            Self::StreamContent { .. } => "stream_content",
            Self::StreamReasoning { .. } => "stream_reasoning",
            Self::ToolCallsReceived { .. } => "tool_calls_received",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolsExecuted { .. } => "tools_executed",
            Self::ApprovalNeeded { .. } => "approval_needed",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
            Self::Cancelled => "cancelled",
            Self::WorkflowStepUpdate { .. } => "workflow_step_update",
            Self::ContextCompressed { .. } => "context_compressed",
        }
    }
}

/// An event stamped with its session and time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub event: AgentEvent,
}

/// A broadcast-based event bus for agent events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Slow subscribers
/// lag and lose the oldest events; the loop never blocks on them.
pub struct EventBus {
    sender: broadcast::Sender<Arc<EventEnvelope>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event for a session to all subscribers.
    pub fn publish(&self, session_id: &SessionId, event: AgentEvent) {
        let envelope = EventEnvelope {
            session_id: session_id.clone(),
            timestamp: Utc::now(),
            event,
        };
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(envelope));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EventEnvelope>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let session = SessionId::from("s-1");

        bus.publish(
            &session,
            AgentEvent::ToolExecuting {
                call_id: "call_1".into(),
                tool_name: "read_file".into(),
            },
        );

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.session_id, session);
        match &envelope.event {
            AgentEvent::ToolExecuting { tool_name, .. } => assert_eq!(tool_name, "read_file"),
            other => panic!("Expected ToolExecuting, got {other:?}"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(&SessionId::new(), AgentEvent::Cancelled);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = AgentEvent::StateChanged {
            from: AgentState::Idle,
            to: AgentState::Planning,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["to"], "planning");
        assert_eq!(event.name(), "state_changed");
    }
}
