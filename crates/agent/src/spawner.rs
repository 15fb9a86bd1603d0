//! Sub-agent spawning: the `task` tool's backend.
//!
//! A child runs its own [`AgentLoop`] in sub-agent mode with a fresh
//! conversation and todo ledger, a lower iteration cap and no `task` tool,
//! so delegation is one level deep. It shares the parent's event bus and
//! approval broker, and its cancellation token is a child of the
//! parent's.

use std::sync::Arc;

use async_trait::async_trait;
use holdfast_config::AgentSettings;
use holdfast_core::agent::AgentState;
use holdfast_core::error::ToolError;
use holdfast_core::event::EventBus;
use holdfast_core::model::ModelClient;
use holdfast_core::todo::TodoBoard;
use holdfast_core::tool::{SubAgentSpawner, ToolContext};
use holdfast_security::AuditLogger;
use holdfast_tools::ToolExecutor;
use tracing::info;

use crate::approval::ApprovalBroker;
use crate::loop_runner::AgentLoop;
use crate::prompt::{AgentMode, DefaultPromptAssembler, PromptAssembler};
use crate::session::SessionConfig;

pub struct LoopSpawner {
    model: Arc<dyn ModelClient>,
    executor: ToolExecutor,
    settings: AgentSettings,
    prompt: Arc<dyn PromptAssembler>,
    event_bus: Arc<EventBus>,
    todo_board: Arc<TodoBoard>,
    approvals: Arc<ApprovalBroker>,
    audit: Option<Arc<AuditLogger>>,
}

impl LoopSpawner {
    /// `executor` and `settings` are the parent's; the child gets the same
    /// tools minus `task` and `sub_agent_max_iterations` as its cap.
    pub fn new(model: Arc<dyn ModelClient>, executor: &ToolExecutor, settings: &AgentSettings) -> Self {
        let mut settings = settings.clone();
        settings.max_iterations = settings.sub_agent_max_iterations.max(1);
        Self {
            model,
            executor: executor.without_tools(&["task"]),
            settings,
            prompt: Arc::new(DefaultPromptAssembler),
            event_bus: Arc::new(EventBus::default()),
            todo_board: Arc::new(TodoBoard::new()),
            approvals: Arc::new(ApprovalBroker::new()),
            audit: None,
        }
    }

    pub fn with_prompt_assembler(mut self, prompt: Arc<dyn PromptAssembler>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn with_todo_board(mut self, board: Arc<TodoBoard>) -> Self {
        self.todo_board = board;
        self
    }

    pub fn with_approval_broker(mut self, approvals: Arc<ApprovalBroker>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }
}

#[async_trait]
impl SubAgentSpawner for LoopSpawner {
    async fn spawn(&self, instruction: String, ctx: &ToolContext) -> Result<String, ToolError> {
        let mut child = AgentLoop::new(
            self.model.clone(),
            ctx.model_id.clone(),
            self.executor.clone(),
            self.settings.clone(),
        )
        .with_prompt_assembler(self.prompt.clone())
        .with_event_bus(self.event_bus.clone())
        .with_todo_board(self.todo_board.clone())
        .with_approval_broker(self.approvals.clone())
        .with_cancel(ctx.cancel.child_token());
        if let Some(audit) = &self.audit {
            child = child.with_audit(audit.clone());
        }

        let child_id = child.session_id().clone();
        info!(parent = %ctx.session_id, child = %child_id.as_str(), "Sub-agent started");

        let config = SessionConfig::new(instruction, ctx.project_root.clone()).with_mode(AgentMode::SubAgent);
        let outcome = child.start(config).await;
        self.todo_board.remove(child_id.as_str());

        info!(
            child = %child_id.as_str(),
            state = outcome.state.as_str(),
            iterations = outcome.iterations,
            "Sub-agent finished"
        );
        match outcome.state {
            AgentState::Complete => Ok(outcome.final_text),
            AgentState::Cancelled => Err(ToolError::Cancelled),
            _ => Err(ToolError::ExecutionFailed {
                tool_name: "task".into(),
                reason: outcome
                    .error
                    .unwrap_or_else(|| "sub-agent did not complete".into()),
            }),
        }
    }
}
