//! The agent loop: call the model, run its tools, decide when to stop.
//!
//! One [`AgentLoop`] drives one session. Each iteration compresses the
//! context if it grew too large, streams one model turn and then either
//! executes the requested tools or weighs the candidate answer. A
//! candidate answer ends the session only once the completion gate passes,
//! after bounded nudges for stalls, open todos and failed checks.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use holdfast_config::AgentSettings;
use holdfast_core::agent::AgentState;
use holdfast_core::error::{ModelError, ToolError, ToolErrorCode};
use holdfast_core::event::{AgentEvent, EventBus};
use holdfast_core::message::{Message, SessionId};
use holdfast_core::model::{ChatRequest, ModelClient, ToolChoice};
use holdfast_core::store::{ExecutionHistory, HistoryStore, TodoStore};
use holdfast_core::todo::TodoBoard;
use holdfast_core::tool::{SubAgentSpawner, ToolCall, ToolContext, ToolDefinition, ToolResult};
use holdfast_security::{AuditEvent, AuditLogger, AuditOutcome};
use holdfast_tools::ToolExecutor;
use holdfast_workflow::WorkflowMatcher;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::approval::ApprovalBroker;
use crate::context::{estimate_messages_tokens, ContextCompressor};
use crate::gate::CompletionGate;
use crate::nudge;
use crate::prompt::{DefaultPromptAssembler, PromptAssembler, PromptRequest};
use crate::session::{AgentSession, LoopOutcome, SessionConfig};
use crate::spawner::LoopSpawner;
use crate::stream::{collect_turn, ModelTurn};
use crate::tracker::{CallKind, ExecutionTracker};

/// Name of the delegation tool, hidden when no spawner is attached.
const TASK_TOOL: &str = "task";

/// What to do with an answer that came without tool calls.
enum AnswerDecision {
    /// A nudge was injected; call the model again
    Continue,
    /// Accept the answer
    Complete { text: String, caveated: bool },
}

/// Host-side controls for a running loop. Cheap to clone.
#[derive(Clone)]
pub struct AgentHandle {
    session_id: SessionId,
    run: Arc<RunToken>,
    approvals: Arc<ApprovalBroker>,
    event_bus: Arc<EventBus>,
}

/// Cancellation token of the current run, or of the next one when idle.
///
/// A run that ended cancelled leaves its token in place, so the handle
/// keeps reporting it; the next `start` swaps in a fresh child of the
/// loop's parent token.
struct RunToken {
    slot: Mutex<RunSlot>,
}

struct RunSlot {
    token: CancellationToken,
    /// A run has started with `token`
    used: bool,
}

impl RunToken {
    fn new(parent: &CancellationToken) -> Self {
        Self {
            slot: Mutex::new(RunSlot {
                token: parent.child_token(),
                used: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> CancellationToken {
        self.lock().token.clone()
    }

    /// Token for a new run. A token already spent on a cancelled run is
    /// replaced; one cancelled before any run is honoured.
    fn begin(&self, parent: &CancellationToken) -> CancellationToken {
        let mut slot = self.lock();
        if slot.used && slot.token.is_cancelled() {
            slot.token = parent.child_token();
        }
        slot.used = true;
        slot.token.clone()
    }
}

impl AgentHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Stop the session. A pending approval is denied; the loop ends in
    /// `Cancelled` at its next checkpoint. Repeated calls are no-ops.
    pub fn cancel(&self) {
        let token = self.run.current();
        if token.is_cancelled() {
            return;
        }
        info!(session = %self.session_id.as_str(), "Cancellation requested");
        token.cancel();
        self.approvals.deny_pending();
        self.event_bus.publish(&self.session_id, AgentEvent::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.run.current().is_cancelled()
    }

    /// Deliver a human decision for a pending call. Returns false when
    /// nothing with that id is waiting.
    pub fn handle_approval(&self, call_id: &str, approved: bool) -> bool {
        self.approvals.resolve(call_id, approved)
    }

    pub fn pending_approval(&self) -> Option<String> {
        self.approvals.pending_call_id()
    }
}

/// The core agent loop.
pub struct AgentLoop {
    model: Arc<dyn ModelClient>,
    model_id: String,
    executor: ToolExecutor,
    settings: AgentSettings,
    session_id: SessionId,
    prompt: Arc<dyn PromptAssembler>,
    compressor: ContextCompressor,
    gate: CompletionGate,
    event_bus: Arc<EventBus>,
    workflow_matcher: Option<Arc<dyn WorkflowMatcher>>,
    todo_store: Option<Arc<dyn TodoStore>>,
    history_store: Option<Arc<dyn HistoryStore>>,
    todo_board: Arc<TodoBoard>,
    audit: Option<Arc<AuditLogger>>,
    spawner: Option<Arc<dyn SubAgentSpawner>>,
    approvals: Arc<ApprovalBroker>,
    cancel: CancellationToken,
    run: Arc<RunToken>,
}

impl AgentLoop {
    pub fn new(
        model: Arc<dyn ModelClient>,
        model_id: impl Into<String>,
        executor: ToolExecutor,
        settings: AgentSettings,
    ) -> Self {
        let gate = CompletionGate::new(settings.lint_command.clone());
        let cancel = CancellationToken::new();
        Self {
            model,
            model_id: model_id.into(),
            executor,
            settings,
            session_id: SessionId::new(),
            prompt: Arc::new(DefaultPromptAssembler),
            compressor: ContextCompressor::new(),
            gate,
            event_bus: Arc::new(EventBus::default()),
            workflow_matcher: None,
            todo_store: None,
            history_store: None,
            todo_board: Arc::new(TodoBoard::new()),
            audit: None,
            spawner: None,
            approvals: Arc::new(ApprovalBroker::new()),
            run: Arc::new(RunToken::new(&cancel)),
            cancel,
        }
    }

    /// Resume an existing session id (its stored history is replayed).
    pub fn with_session_id(mut self, id: SessionId) -> Self {
        self.session_id = id;
        self
    }

    pub fn with_prompt_assembler(mut self, prompt: Arc<dyn PromptAssembler>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn with_workflow_matcher(mut self, matcher: Arc<dyn WorkflowMatcher>) -> Self {
        self.workflow_matcher = Some(matcher);
        self
    }

    pub fn with_todo_store(mut self, store: Arc<dyn TodoStore>) -> Self {
        self.todo_store = Some(store);
        self
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn with_todo_board(mut self, board: Arc<TodoBoard>) -> Self {
        self.todo_board = board;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn SubAgentSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn with_approval_broker(mut self, approvals: Arc<ApprovalBroker>) -> Self {
        self.approvals = approvals;
        self
    }

    /// Parent token: cancelling it stops every run of this loop.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.run = Arc::new(RunToken::new(&cancel));
        self.cancel = cancel;
        self
    }

    /// Enable the `task` tool with a [`LoopSpawner`] built from this loop's
    /// model, tools, settings, prompt, event bus, todo board and approvals.
    /// Call after those are configured.
    pub fn with_sub_agents(mut self) -> Self {
        let mut spawner = LoopSpawner::new(self.model.clone(), &self.executor, &self.settings)
            .with_prompt_assembler(self.prompt.clone())
            .with_event_bus(self.event_bus.clone())
            .with_todo_board(self.todo_board.clone())
            .with_approval_broker(self.approvals.clone());
        if let Some(audit) = &self.audit {
            spawner = spawner.with_audit(audit.clone());
        }
        self.spawner = Some(Arc::new(spawner));
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            session_id: self.session_id.clone(),
            run: self.run.clone(),
            approvals: self.approvals.clone(),
            event_bus: self.event_bus.clone(),
        }
    }

    /// Run one session to a terminal state. A loop may be started again
    /// after a run ends, including one that was cancelled.
    pub async fn start(&self, config: SessionConfig) -> LoopOutcome {
        let todos = self.todo_board.reset(self.session_id.as_str());
        let cancel = self.run.begin(&self.cancel);
        let mut session = AgentSession::new(self.session_id.clone(), todos, cancel);
        session.tracker = ExecutionTracker::for_root(&config.project_root);
        info!(
            session = %session.id.as_str(),
            mode = ?config.mode,
            model = %self.model_id,
            "Agent session started"
        );

        session.transition(AgentState::Planning, &self.event_bus);
        self.prepare(&mut session, &config).await;

        let outcome = self.run(&mut session, &config).await;
        self.persist(&session, &config, &outcome).await;

        info!(
            session = %session.id.as_str(),
            state = outcome.state.as_str(),
            iterations = outcome.iterations,
            tool_calls = outcome.tool_calls,
            "Agent session finished"
        );
        outcome
    }

    // ── Setup ───────────────────────────────────────────────────────────────

    async fn prepare(&self, session: &mut AgentSession, config: &SessionConfig) {
        let system = self.prompt.assemble(&PromptRequest {
            mode: config.mode,
            project_root: config.project_root.clone(),
            open_files: config.open_files.clone(),
            model_id: self.model_id.clone(),
        });
        session.conversation.push(Message::system(system));
        session.conversation.push(Message::user(config.request.clone()));

        if let Some(store) = &self.history_store {
            match store.load_history(session.id.as_str()).await {
                Ok(Some(history)) => {
                    debug!(session = %session.id.as_str(), "Replaying session memory");
                    session
                        .conversation
                        .push(Message::critical_system(history.render()));
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to load session history: {e}"),
            }
        }

        if let Some(matcher) = &self.workflow_matcher {
            match matcher.match_request(&config.request).await {
                Ok(Some(workflow)) => {
                    info!(workflow = %workflow.id, "Workflow selected");
                    let active = holdfast_workflow::ActiveWorkflow::new(workflow);
                    session.conversation.push(active.instructions_message());
                    if let Some(step) = active.current_step() {
                        let (completed, total) = active.progress();
                        self.event_bus.publish(
                            &session.id,
                            AgentEvent::WorkflowStepUpdate {
                                step_id: step.id.clone(),
                                title: step.title.clone(),
                                status: step.status.as_str().to_string(),
                                completed,
                                total,
                            },
                        );
                    }
                    session.workflow = Some(active);
                }
                Ok(None) => {}
                Err(e) => warn!("Workflow matching failed: {e}"),
            }
        }
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut tools = self.executor.definitions();
        if self.spawner.is_none() {
            tools.retain(|t| t.name != TASK_TOOL);
        }
        tools
    }

    // ── Main loop ───────────────────────────────────────────────────────────

    async fn run(&self, session: &mut AgentSession, config: &SessionConfig) -> LoopOutcome {
        let tools = self.tool_definitions();

        loop {
            if session.cancel.is_cancelled() {
                return self.cancelled(session);
            }
            if session.iteration >= self.settings.max_iterations {
                return self.finish_at_limit(session, tools).await;
            }
            session.iteration += 1;

            self.maybe_compress(session);

            let tool_choice = if std::mem::take(&mut session.force_required) {
                ToolChoice::Required
            } else {
                ToolChoice::Auto
            };
            session.transition(AgentState::CallingModel, &self.event_bus);
            debug!(
                session = %session.id.as_str(),
                iteration = session.iteration,
                ?tool_choice,
                "Calling model"
            );

            let turn = match self.call_model(session, tools.clone(), tool_choice).await {
                Ok(turn) => turn,
                Err(ModelError::Cancelled) => return self.cancelled(session),
                Err(e) => return self.fail(session, format!("Model call failed: {e}")),
            };

            if turn.tool_calls.is_empty() {
                match self.consider_answer(session, turn.text) {
                    AnswerDecision::Continue => continue,
                    AnswerDecision::Complete { text, caveated } => {
                        return self.complete(session, text, caveated, false);
                    }
                }
            }

            self.execute_tools(session, config, turn).await;
        }
    }

    async fn call_model(
        &self,
        session: &AgentSession,
        tools: Vec<ToolDefinition>,
        tool_choice: ToolChoice,
    ) -> Result<ModelTurn, ModelError> {
        let request = ChatRequest {
            model: self.model_id.clone(),
            messages: session.conversation.messages.clone(),
            tools,
            tool_choice,
        };

        let stream = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => return Err(ModelError::Cancelled),
            stream = self.model.stream_chat(request, session.cancel.clone()) => stream?,
        };

        let bus = &self.event_bus;
        let id = &session.id;
        collect_turn(
            stream,
            Duration::from_millis(self.settings.stream_debounce_ms),
            &session.cancel,
            |event| bus.publish(id, event),
        )
        .await
    }

    fn maybe_compress(&self, session: &mut AgentSession) {
        let tokens = estimate_messages_tokens(&session.conversation.messages);
        if tokens <= self.settings.compression_trigger_tokens() {
            return;
        }
        let messages_before = session.conversation.len();
        match self
            .compressor
            .compress(&session.conversation.messages, &session.todos)
        {
            Some(compression) => {
                info!(
                    session = %session.id.as_str(),
                    tokens_before = compression.tokens_before,
                    tokens_after = compression.tokens_after,
                    summarized = compression.summarized,
                    "Context compressed"
                );
                let messages_after = compression.messages.len();
                session.conversation.replace_messages(compression.messages);
                self.event_bus.publish(
                    &session.id,
                    AgentEvent::ContextCompressed {
                        messages_before,
                        messages_after,
                        tokens_before: compression.tokens_before,
                        tokens_after: compression.tokens_after,
                    },
                );
            }
            None => debug!(tokens, "Context over threshold but nothing to compress"),
        }
    }

    // ── Candidate answers ───────────────────────────────────────────────────

    fn consider_answer(&self, session: &mut AgentSession, text: String) -> AnswerDecision {
        session.transition(AgentState::Reflecting, &self.event_bus);

        if session.gate_exhausted {
            let verdict = self.gate.evaluate(&session.todos, &session.tracker);
            return AnswerDecision::Complete {
                text,
                caveated: !verdict.passed(),
            };
        }

        let window: String = text.chars().take(self.settings.stall_window_chars).collect();
        if let Some(previous) = &session.last_no_tool_text
            && same_prefix(previous, &window, self.settings.stall_prefix_chars)
        {
            session.stall_count += 1;
        }
        session.last_no_tool_text = Some(window);

        if session.stall_count >= self.settings.stall_threshold {
            warn!(session = %session.id.as_str(), "Stall detected");
            session.stall_count = 0;
            self.nudge(session, nudge::stall(), true);
            return AnswerDecision::Continue;
        }

        if session.todos.has_outstanding() && session.todo_retries < self.settings.todo_hard_retries {
            session.todo_retries += 1;
            let open = session.todos.outstanding();
            debug!(
                session = %session.id.as_str(),
                attempt = session.todo_retries,
                open = open.len(),
                "Answer with open todos"
            );
            let reminder = nudge::outstanding_todos(
                &open,
                session.todo_retries,
                self.settings.todo_soft_retries,
            );
            self.nudge(session, reminder, true);
            return AnswerDecision::Continue;
        }

        let verdict = self.gate.evaluate(&session.todos, &session.tracker);
        if verdict.passed() {
            return AnswerDecision::Complete {
                text,
                caveated: false,
            };
        }

        if session.gate_retries < self.settings.max_gate_retries {
            session.gate_retries += 1;
            session.todo_retries = 0;
            info!(
                session = %session.id.as_str(),
                attempt = session.gate_retries,
                reasons = verdict.reasons.len(),
                "Completion gate failed"
            );
            self.nudge(session, nudge::gate_failed(&verdict), true);
        } else {
            warn!(session = %session.id.as_str(), "Completion gate retries exhausted");
            session.gate_exhausted = true;
            self.nudge(session, nudge::gate_exhausted(&verdict), false);
        }
        AnswerDecision::Continue
    }

    fn nudge(&self, session: &mut AgentSession, text: String, force_tools: bool) {
        session.conversation.push(Message::system(text));
        session.force_required = force_tools;
        self.event_bus.publish(
            &session.id,
            AgentEvent::ProgressNote {
                message: "Answer rejected, continuing".into(),
            },
        );
    }

    // ── Tool execution ──────────────────────────────────────────────────────

    async fn execute_tools(
        &self,
        session: &mut AgentSession,
        config: &SessionConfig,
        turn: ModelTurn,
    ) {
        let calls = turn.tool_calls;
        session.conversation.push(Message::assistant_tool_calls(
            Some(turn.text.clone()).filter(|t| !t.is_empty()),
            calls.clone(),
            turn.reasoning,
        ));
        self.event_bus.publish(
            &session.id,
            AgentEvent::ToolCallsReceived {
                iteration: session.iteration,
                calls: calls.clone(),
            },
        );
        session.transition(AgentState::ExecutingTools, &self.event_bus);

        let mut ctx = ToolContext::new(config.project_root.clone(), session.id.as_str())
            .with_model(self.model_id.clone())
            .with_todos(session.todos.clone())
            .with_cancel(session.cancel.clone());
        if let Some(spawner) = &self.spawner {
            ctx = ctx.with_spawner(spawner.clone());
        }

        let mut executed = 0;
        let mut failed = 0;
        for call in &calls {
            if session.cancel.is_cancelled() {
                let name = self.executor.canonical_name(&call.name).to_string();
                let result = ToolResult::failed(call, &name, &ToolError::Cancelled, 0);
                session
                    .conversation
                    .push(Message::tool_result(&call.id, result.to_model_text()));
                continue;
            }

            let result = self.run_call(session, &ctx, call).await;
            executed += 1;
            session.tool_calls += 1;
            if !result.success {
                failed += 1;
            }

            let kind = CallKind::of(
                self.executor.modifies_files(&call.name),
                self.executor.is_read_only(&call.name),
            );
            session
                .tracker
                .record(call, &result, kind, self.gate.lint_command());
            self.audit_result(session, call, &result);

            let text = nudge::truncate_output(&result.to_model_text(), self.settings.max_tool_output_chars);
            session
                .conversation
                .push(Message::tool_result(&call.id, text));
            self.event_bus
                .publish(&session.id, AgentEvent::ToolResult { result });
        }

        self.event_bus.publish(
            &session.id,
            AgentEvent::ToolsExecuted {
                iteration: session.iteration,
                count: executed,
                failed,
            },
        );

        session.todo_retries = 0;
        session.stall_count = 0;
        session.last_no_tool_text = None;
        session.transition(AgentState::Reflecting, &self.event_bus);
        self.advance_workflow(session, &turn.text);
    }

    async fn run_call(&self, session: &mut AgentSession, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        let name = self.executor.canonical_name(&call.name).to_string();

        if self.executor.needs_approval(&call.name, self.settings.auto_approve) {
            session.transition(AgentState::AwaitingApproval, &self.event_bus);
            let rx = self.approvals.request(&call.id);
            self.event_bus.publish(
                &session.id,
                AgentEvent::ApprovalNeeded {
                    call_id: call.id.clone(),
                    tool_name: name.clone(),
                    risk: self.executor.risk_level(&call.name),
                    arguments: call.arguments.clone(),
                },
            );
            info!(session = %session.id.as_str(), tool = %name, call_id = %call.id, "Awaiting approval");

            let decision = self
                .approvals
                .wait(
                    rx,
                    Duration::from_secs(self.settings.approval_timeout_secs),
                    &session.cancel,
                )
                .await;
            session.transition(AgentState::ExecutingTools, &self.event_bus);

            if let Some(audit) = &self.audit {
                let (event, outcome) = if decision.is_approved() {
                    (AuditEvent::ApprovalGranted { tool_name: name.clone() }, AuditOutcome::Success)
                } else {
                    (AuditEvent::ApprovalDenied { tool_name: name.clone() }, AuditOutcome::Denied)
                };
                audit.log(
                    event,
                    session.id.as_str(),
                    &call.id,
                    outcome,
                    Some(decision.denial_reason().to_string()).filter(|_| !decision.is_approved()),
                );
            }

            if !decision.is_approved() {
                info!(tool = %name, ?decision, "Tool call not approved");
                let err = ToolError::ApprovalDenied {
                    tool_name: name.clone(),
                    reason: decision.denial_reason().into(),
                };
                return ToolResult::failed(call, &name, &err, 0);
            }
        }

        self.event_bus.publish(
            &session.id,
            AgentEvent::ToolExecuting {
                call_id: call.id.clone(),
                tool_name: name,
            },
        );
        self.executor.execute(call, ctx).await
    }

    fn audit_result(&self, session: &AgentSession, call: &ToolCall, result: &ToolResult) {
        let Some(audit) = &self.audit else {
            return;
        };
        let event = match result.error_code() {
            Some(ToolErrorCode::PathTraversal) => AuditEvent::PathDenied {
                path: call.str_arg("path").unwrap_or_default().to_string(),
            },
            Some(ToolErrorCode::CmdBlocked) => AuditEvent::CommandBlocked {
                command: call.str_arg("command").unwrap_or_default().to_string(),
            },
            _ => return,
        };
        audit.log(
            event,
            session.id.as_str(),
            &result.tool_name,
            AuditOutcome::Denied,
            result.error.as_ref().map(|e| e.message.clone()),
        );
    }

    fn advance_workflow(&self, session: &mut AgentSession, text: &str) {
        let Some(workflow) = session.workflow.as_mut() else {
            return;
        };
        let Some(advance) = workflow.try_advance(text) else {
            return;
        };
        let (completed, total) = workflow.progress();
        for step in std::iter::once(advance.completed).chain(advance.next) {
            self.event_bus.publish(
                &session.id,
                AgentEvent::WorkflowStepUpdate {
                    step_id: step.id,
                    title: step.title,
                    status: step.status.as_str().to_string(),
                    completed,
                    total,
                },
            );
        }
    }

    // ── Endings ─────────────────────────────────────────────────────────────

    async fn finish_at_limit(&self, session: &mut AgentSession, tools: Vec<ToolDefinition>) -> LoopOutcome {
        warn!(
            session = %session.id.as_str(),
            max = self.settings.max_iterations,
            "Iteration limit reached"
        );
        session.conversation.push(Message::system(nudge::max_iterations(
            &session.todos,
            self.settings.max_iterations,
        )));
        session.transition(AgentState::CallingModel, &self.event_bus);

        match self.call_model(session, tools, ToolChoice::None).await {
            Ok(turn) => {
                if !turn.tool_calls.is_empty() {
                    warn!(count = turn.tool_calls.len(), "Ignoring tool calls after the iteration limit");
                }
                self.complete(session, turn.text, false, true)
            }
            Err(ModelError::Cancelled) => self.cancelled(session),
            Err(e) => self.fail(session, format!("Model call failed: {e}")),
        }
    }

    fn complete(
        &self,
        session: &mut AgentSession,
        text: String,
        caveated: bool,
        max_iterations_reached: bool,
    ) -> LoopOutcome {
        self.advance_workflow(session, &text);
        session.conversation.push(Message::assistant(text.clone()));
        session.transition(AgentState::Complete, &self.event_bus);

        let mut outcome = session.outcome(text, None);
        outcome.caveated = caveated;
        outcome.max_iterations_reached = max_iterations_reached;
        self.event_bus.publish(
            &session.id,
            AgentEvent::Complete {
                final_text: outcome.final_text.clone(),
                iterations: outcome.iterations,
                tool_calls: outcome.tool_calls,
                max_iterations_reached,
                caveated,
                progress: outcome.progress,
            },
        );
        outcome
    }

    fn fail(&self, session: &mut AgentSession, message: String) -> LoopOutcome {
        error!(session = %session.id.as_str(), "{message}");
        session.transition(AgentState::Failed, &self.event_bus);
        self.event_bus.publish(
            &session.id,
            AgentEvent::Error {
                message: message.clone(),
            },
        );
        session.outcome(String::new(), Some(message))
    }

    fn cancelled(&self, session: &mut AgentSession) -> LoopOutcome {
        info!(session = %session.id.as_str(), "Agent session cancelled");
        session.transition(AgentState::Cancelled, &self.event_bus);
        session.outcome(String::new(), Some("cancelled".into()))
    }

    /// Save the todo snapshot and fold this run into the session history.
    /// Store failures are logged, never fatal.
    async fn persist(&self, session: &AgentSession, config: &SessionConfig, outcome: &LoopOutcome) {
        let id = session.id.as_str();

        if let Some(store) = &self.todo_store
            && let Err(e) = store.save_todos(id, &session.todos.snapshot()).await
        {
            warn!(store = store.name(), "Failed to save todos: {e}");
        }

        let Some(store) = &self.history_store else {
            return;
        };
        let mut history = match store.load_history(id).await {
            Ok(Some(history)) => history,
            Ok(None) => ExecutionHistory::new(id),
            Err(e) => {
                warn!(store = store.name(), "Failed to load history, starting fresh: {e}");
                ExecutionHistory::new(id)
            }
        };
        let background = format!(
            "Request: {}\nOutcome: {} after {} iteration(s) and {} tool call(s)",
            clip(&config.request, 300),
            outcome.state.as_str(),
            outcome.iterations,
            outcome.tool_calls
        );
        let pending = self.gate.evaluate(&session.todos, &session.tracker).reasons;
        history.record_run(background, session.tracker.changed_files().to_vec(), pending);
        if let Err(e) = store.save_history(&history).await {
            warn!(store = store.name(), "Failed to save history: {e}");
        }
    }
}

/// Whether two answers open with the same `prefix_chars` characters.
fn same_prefix(previous: &str, current: &str, prefix_chars: usize) -> bool {
    let a: String = previous.chars().take(prefix_chars).collect();
    let b: String = current.chars().take(prefix_chars).collect();
    !a.trim().is_empty() && a == b
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}
