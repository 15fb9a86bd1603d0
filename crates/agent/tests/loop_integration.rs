//! End-to-end tests for the agent loop against a scripted model.
//!
//! The scripted model replays canned turns in order and records every
//! request, so tests can check what the loop sent back after a nudge.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use holdfast_agent::{AgentLoop, AgentMode, LoopOutcome, SessionConfig};
use holdfast_config::{AgentSettings, ToolSettings};
use holdfast_core::error::ModelError;
use holdfast_core::event::{AgentEvent, EventBus};
use holdfast_core::message::{Role, SessionId};
use holdfast_core::model::{ChatRequest, ChunkStream, ModelClient, StreamChunk, ToolChoice};
use holdfast_core::store::{HistoryStore, TodoStore};
use holdfast_core::tool::ToolCall;
use holdfast_core::{AgentState, ToolErrorCode, TodoStatus};
use holdfast_security::{AuditEvent, AuditLogger};
use holdfast_store::InMemoryStore;
use holdfast_tools::default_executor;
use holdfast_workflow::{KeywordWorkflowMatcher, Workflow, WorkflowNode};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

// ── Scripted model ──────────────────────────────────────────────────────

enum Turn {
    Text(String),
    Tools(Vec<ToolCall>),
    Fail(ModelError),
}

fn text(t: &str) -> Turn {
    Turn::Text(t.to_string())
}

fn tools(calls: Vec<ToolCall>) -> Turn {
    Turn::Tools(calls)
}

struct ScriptedModel {
    turns: Mutex<VecDeque<Turn>>,
    requests: Mutex<Vec<ChatRequest>>,
    /// Never answer once the script runs out
    hang_when_empty: bool,
    parked: Mutex<Vec<mpsc::Sender<Result<StreamChunk, ModelError>>>>,
}

impl ScriptedModel {
    fn new(turns: Vec<Turn>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            hang_when_empty: false,
            parked: Mutex::new(Vec::new()),
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            hang_when_empty: true,
            parked: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        _cancel: CancellationToken,
    ) -> Result<ChunkStream, ModelError> {
        self.requests.lock().unwrap().push(request);
        let (tx, rx) = mpsc::channel(16);

        let next = self.turns.lock().unwrap().pop_front();
        let turn = match next {
            Some(turn) => turn,
            None if self.hang_when_empty => {
                self.parked.lock().unwrap().push(tx);
                return Ok(rx);
            }
            None => text("Nothing left to do."),
        };

        match turn {
            Turn::Fail(err) => return Err(err),
            Turn::Text(answer) => {
                tx.send(Ok(StreamChunk::ContentDelta { text: answer })).await.unwrap();
                tx.send(Ok(StreamChunk::Done {
                    text: None,
                    reasoning: None,
                    tool_calls: vec![],
                }))
                .await
                .unwrap();
            }
            Turn::Tools(calls) => {
                tx.send(Ok(StreamChunk::Done {
                    text: None,
                    reasoning: None,
                    tool_calls: calls,
                }))
                .await
                .unwrap();
            }
        }
        Ok(rx)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn settings() -> AgentSettings {
    AgentSettings {
        stream_debounce_ms: 0,
        auto_approve: true,
        ..AgentSettings::default()
    }
}

fn agent(model: Arc<ScriptedModel>, settings: AgentSettings) -> AgentLoop {
    AgentLoop::new(model, "test-model", default_executor(&ToolSettings::default()), settings)
}

fn todo_call(id: &str, items: &[(&str, &str, &str)]) -> ToolCall {
    let todos: Vec<_> = items
        .iter()
        .map(|(id, content, status)| json!({"id": id, "content": content, "status": status}))
        .collect();
    ToolCall::new(id, "todo_write", json!({ "todos": todos }))
}

fn drain(rx: &mut broadcast::Receiver<Arc<holdfast_core::EventEnvelope>>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        events.push(envelope.event.clone());
    }
    events
}

fn last_message_text(request: &ChatRequest) -> String {
    request
        .messages
        .last()
        .map(|m| m.text().to_string())
        .unwrap_or_default()
}

async fn run(agent: &AgentLoop, root: &std::path::Path, request: &str) -> LoopOutcome {
    agent.start(SessionConfig::new(request, root)).await
}

// ── Scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn completes_after_closing_every_todo() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![todo_call(
            "t1",
            &[
                ("1", "Create notes", "in_progress"),
                ("2", "Write summary", "pending"),
                ("3", "Review", "pending"),
            ],
        )]),
        tools(vec![ToolCall::new(
            "w1",
            "write_file",
            json!({"path": "notes.txt", "content": "hello\n"}),
        )]),
        tools(vec![todo_call(
            "t2",
            &[
                ("1", "Create notes", "completed"),
                ("2", "Write summary", "completed"),
                ("3", "Review", "completed"),
            ],
        )]),
        text("All three items are done."),
    ]);
    let bus = Arc::new(EventBus::new(256));
    let mut rx = bus.subscribe();
    let agent = agent(model.clone(), settings()).with_event_bus(bus);

    let outcome = run(&agent, dir.path(), "Create notes.txt and summarize").await;

    assert!(outcome.success);
    assert_eq!(outcome.state, AgentState::Complete);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(outcome.tool_calls, 3);
    assert_eq!(outcome.final_text, "All three items are done.");
    assert_eq!(outcome.progress.completed, 3);
    assert!(!outcome.caveated);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "hello\n"
    );

    let events = drain(&mut rx);
    assert!(matches!(
        events.first(),
        Some(AgentEvent::StateChanged {
            from: AgentState::Idle,
            to: AgentState::Planning
        })
    ));
    assert!(events.iter().any(|e| matches!(e, AgentEvent::Complete { .. })));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, AgentEvent::ApprovalNeeded { .. }))
    );
}

#[tokio::test]
async fn open_todos_force_another_tool_turn() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![todo_call(
            "t1",
            &[("1", "Parse input", "pending"), ("2", "Print output", "pending")],
        )]),
        text("I think we are done here."),
        tools(vec![todo_call(
            "t2",
            &[("1", "Parse input", "completed"), ("2", "Print output", "completed")],
        )]),
        text("Both items finished."),
    ]);
    let agent = agent(model.clone(), settings());

    let outcome = run(&agent, dir.path(), "Parse then print").await;
    assert!(outcome.success);
    assert_eq!(outcome.final_text, "Both items finished.");

    let requests = model.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[1].tool_choice, ToolChoice::Auto);
    assert_eq!(requests[2].tool_choice, ToolChoice::Required);
    let nudge = last_message_text(&requests[2]);
    assert!(nudge.contains("2 todo item(s) are still open"));
    assert!(nudge.contains("Parse input"));
    assert_eq!(requests[3].tool_choice, ToolChoice::Auto);

    // The rejected answer never enters the conversation
    assert!(
        !requests[3]
            .messages
            .iter()
            .any(|m| m.role == Role::Assistant && m.text() == "I think we are done here.")
    );
}

#[tokio::test]
async fn repeated_answers_trigger_stall_nudge() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![todo_call("t1", &[("1", "Fix bug", "pending")])]),
        text("Working on it."),
        text("Working on it."),
        text("Working on it."),
        tools(vec![todo_call("t2", &[("1", "Fix bug", "completed")])]),
        text("Fixed."),
    ]);
    let agent = agent(model.clone(), settings());

    let outcome = run(&agent, dir.path(), "Fix the bug").await;
    assert!(outcome.success);

    let requests = model.requests();
    assert!(last_message_text(&requests[2]).contains("still open"));
    assert!(last_message_text(&requests[3]).contains("still open"));
    assert!(last_message_text(&requests[4]).contains("repeating the same answer"));
    assert_eq!(requests[4].tool_choice, ToolChoice::Required);
}

#[tokio::test]
async fn exhausted_gate_accepts_caveated_answer() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![todo_call("t1", &[("1", "Deploy", "pending")])]),
        text("Done."),
        text("Really done now."),
        text("Deploy is still open because credentials are missing."),
    ]);
    let settings = AgentSettings {
        max_gate_retries: 1,
        todo_hard_retries: 0,
        ..settings()
    };
    let agent = agent(model.clone(), settings);

    let outcome = run(&agent, dir.path(), "Deploy the service").await;
    assert!(outcome.success);
    assert!(outcome.caveated);
    assert_eq!(outcome.iterations, 4);

    let requests = model.requests();
    assert!(last_message_text(&requests[2]).contains("cannot be marked complete"));
    assert_eq!(requests[2].tool_choice, ToolChoice::Required);
    assert!(last_message_text(&requests[3]).contains("Completion checks still fail"));
    assert_eq!(requests[3].tool_choice, ToolChoice::Auto);
}

#[tokio::test]
async fn iteration_limit_ends_with_a_tool_free_summary() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![todo_call("t1", &[("1", "Step one", "in_progress")])]),
        tools(vec![todo_call("t2", &[("1", "Step one", "completed"), ("2", "Step two", "pending")])]),
        text("Step one done, step two remains."),
    ]);
    let settings = AgentSettings {
        max_iterations: 2,
        ..settings()
    };
    let agent = agent(model.clone(), settings);

    let outcome = run(&agent, dir.path(), "Do both steps").await;
    assert_eq!(outcome.state, AgentState::Complete);
    assert!(outcome.max_iterations_reached);
    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.final_text, "Step one done, step two remains.");

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].tool_choice, ToolChoice::None);
    let summary = last_message_text(&requests[2]);
    assert!(summary.contains("iteration limit (2)"));
    assert!(summary.contains("[ ] Step two"));
}

#[tokio::test]
async fn model_error_fails_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![Turn::Fail(ModelError::Network("connection reset".into()))]);
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let agent = agent(model, settings()).with_event_bus(bus);

    let outcome = run(&agent, dir.path(), "Anything").await;
    assert!(!outcome.success);
    assert_eq!(outcome.state, AgentState::Failed);
    assert!(outcome.error.unwrap().contains("connection reset"));
    assert!(
        drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AgentEvent::Error { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_approval_times_out_as_denied() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![ToolCall::new("c1", "run_command", json!({"command": "echo hi"}))]),
        text("The command was not approved, so nothing ran."),
    ]);
    let settings = AgentSettings {
        auto_approve: false,
        ..settings()
    };
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let audit = Arc::new(AuditLogger::new());
    let agent = agent(model.clone(), settings)
        .with_event_bus(bus)
        .with_audit(audit.clone());

    let outcome = run(&agent, dir.path(), "Say hi").await;
    assert!(outcome.success);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        AgentEvent::ApprovalNeeded { call_id, tool_name, .. }
            if call_id == "c1" && tool_name == "run_command"
    )));
    let denied = events.iter().find_map(|e| match e {
        AgentEvent::ToolResult { result } => Some(result.clone()),
        _ => None,
    });
    assert_eq!(denied.unwrap().error_code(), Some(ToolErrorCode::ApprovalDenied));

    let requests = model.requests();
    assert!(last_message_text(&requests[1]).contains("APPROVAL_DENIED"));
    assert!(matches!(
        audit.entries()[0].event,
        AuditEvent::ApprovalDenied { .. }
    ));
}

#[tokio::test]
async fn approved_call_runs() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![ToolCall::new(
            "w1",
            "write_file",
            json!({"path": "out.txt", "content": "approved"}),
        )]),
        text("Wrote out.txt."),
    ]);
    let settings = AgentSettings {
        auto_approve: false,
        ..settings()
    };
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let agent = Arc::new(agent(model, settings).with_event_bus(bus));
    let handle = agent.handle();

    let approver = tokio::spawn(async move {
        while let Ok(envelope) = rx.recv().await {
            if let AgentEvent::ApprovalNeeded { call_id, .. } = &envelope.event {
                assert!(!handle.handle_approval("wrong-id", true));
                assert!(handle.handle_approval(call_id, true));
                return;
            }
        }
    });

    let outcome = run(&agent, dir.path(), "Write out.txt").await;
    approver.await.unwrap();
    assert!(outcome.success);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
        "approved"
    );
}

#[tokio::test]
async fn cancellation_is_final() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::hanging();
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let agent = Arc::new(agent(model, settings()).with_event_bus(bus));
    let handle = agent.handle();

    let root = dir.path().to_path_buf();
    let task = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.start(SessionConfig::new("Wait forever", root)).await })
    };

    // Wait until the loop is blocked on the model
    loop {
        let envelope = rx.recv().await.unwrap();
        if matches!(
            envelope.event,
            AgentEvent::StateChanged {
                to: AgentState::CallingModel,
                ..
            }
        ) {
            break;
        }
    }

    handle.cancel();
    handle.cancel();
    let outcome = task.await.unwrap();

    assert_eq!(outcome.state, AgentState::Cancelled);
    assert!(!outcome.success);
    assert!(handle.is_cancelled());

    let events = drain(&mut rx);
    let cancelled_events = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Cancelled))
        .count();
    assert_eq!(cancelled_events, 1);
    let last_state = events.iter().rev().find_map(|e| match e {
        AgentEvent::StateChanged { to, .. } => Some(*to),
        _ => None,
    });
    assert_eq!(last_state, Some(AgentState::Cancelled));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Complete { .. })));
}

#[tokio::test]
async fn stores_keep_todos_and_history_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let session = SessionId::from("persisted");

    let model = ScriptedModel::new(vec![
        tools(vec![
            todo_call("t1", &[("1", "Write file", "in_progress")]),
            ToolCall::new("w1", "write_file", json!({"path": "a.txt", "content": "a"})),
        ]),
        tools(vec![todo_call("t2", &[("1", "Write file", "completed")])]),
        text("Wrote a.txt."),
    ]);
    let first = agent(model, settings())
        .with_session_id(session.clone())
        .with_todo_store(store.clone())
        .with_history_store(store.clone());
    assert!(run(&first, dir.path(), "Write a.txt").await.success);

    let todos = store.load_todos("persisted").await.unwrap().unwrap();
    assert_eq!(todos.len(), 1);
    assert_eq!(todos[0].status, TodoStatus::Completed);
    let history = store.load_history("persisted").await.unwrap().unwrap();
    assert!(history.background.contains("Write a.txt"));
    assert_eq!(history.changed_files, vec!["a.txt"]);
    assert!(history.pending_issues.is_empty());

    let model = ScriptedModel::new(vec![text("Nothing else needed.")]);
    let second = agent(model.clone(), settings())
        .with_session_id(session)
        .with_history_store(store.clone());
    assert!(run(&second, dir.path(), "Anything left?").await.success);

    let first_request = &model.requests()[0];
    assert!(
        first_request
            .messages
            .iter()
            .any(|m| m.critical && m.text().contains("Session memory") && m.text().contains("a.txt"))
    );
}

#[tokio::test]
async fn path_escape_is_audited_without_blocking_completion() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![ToolCall::new(
            "r1",
            "read_file",
            json!({"path": "../../etc/passwd"}),
        )]),
        text("The file is outside the project, so I stopped."),
    ]);
    let settings = AgentSettings {
        max_gate_retries: 0,
        ..settings()
    };
    let audit = Arc::new(AuditLogger::new());
    let agent = agent(model, settings).with_audit(audit.clone());

    let outcome = run(&agent, dir.path(), "Show /etc/passwd").await;
    assert!(outcome.success);
    assert!(!outcome.caveated);
    assert_eq!(outcome.iterations, 2);

    let entries = audit.entries();
    assert_eq!(entries.len(), 1);
    assert!(matches!(
        &entries[0].event,
        AuditEvent::PathDenied { path } if path == "../../etc/passwd"
    ));
}

#[tokio::test]
async fn rewrite_after_failed_edit_passes_the_gate() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![ToolCall::new(
            "e1",
            "edit_file",
            json!({"path": "a.txt", "old_string": "omega", "new_string": "beta"}),
        )]),
        tools(vec![ToolCall::new(
            "w1",
            "write_file",
            json!({"path": "./a.txt", "content": "beta\n"}),
        )]),
        text("Rewrote a.txt."),
        text("Rewrote a.txt, really."),
    ]);
    let settings = AgentSettings {
        max_gate_retries: 1,
        ..settings()
    };
    let agent = agent(model.clone(), settings);

    let outcome = run(&agent, dir.path(), "Change alpha to beta").await;
    assert!(outcome.success);
    assert!(!outcome.caveated);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.final_text, "Rewrote a.txt.");
    assert_eq!(model.requests().len(), 3);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
        "beta\n"
    );
}

#[tokio::test]
async fn sub_agent_answers_through_the_task_tool() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![
        tools(vec![ToolCall::new(
            "k1",
            "task",
            json!({"instruction": "Count the files"}),
        )]),
        text("There are 3 files."),
        text("The sub-agent counted 3 files."),
    ]);
    let agent = agent(model.clone(), settings()).with_sub_agents();

    let outcome = run(&agent, dir.path(), "How many files?").await;
    assert!(outcome.success);
    assert_eq!(outcome.final_text, "The sub-agent counted 3 files.");

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].tools.iter().any(|t| t.name == "task"));

    let child = &requests[1];
    assert!(child.messages[0].text().contains("delegated subtask"));
    assert_eq!(child.messages[1].text(), "Count the files");
    assert!(!child.tools.iter().any(|t| t.name == "task"));

    assert!(last_message_text(&requests[2]).contains("There are 3 files."));
}

#[tokio::test]
async fn task_tool_hidden_without_spawner() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![text("Hi.")]);
    let agent = agent(model.clone(), settings());
    run(&agent, dir.path(), "Hello").await;
    assert!(!model.requests()[0].tools.iter().any(|t| t.name == "task"));
}

#[tokio::test]
async fn sub_agent_mode_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![text("ok")]);
    let agent = agent(model.clone(), settings());
    agent
        .start(SessionConfig::new("Subtask", dir.path()).with_mode(AgentMode::SubAgent))
        .await;
    assert!(model.requests()[0].messages[0].text().contains("delegated subtask"));
}

#[tokio::test]
async fn long_sessions_are_compressed() {
    let dir = tempfile::tempdir().unwrap();
    let mut turns = Vec::new();
    for i in 0..12 {
        turns.push(tools(vec![ToolCall::new(
            format!("w{i}"),
            "write_file",
            json!({"path": format!("f{i}.txt"), "content": "x".repeat(400)}),
        )]));
    }
    turns.push(text("Wrote twelve files."));
    let model = ScriptedModel::new(turns);

    let settings = AgentSettings {
        token_budget: 2_000,
        response_reserve: 0,
        compression_threshold_percent: 50,
        ..settings()
    };
    let bus = Arc::new(EventBus::new(512));
    let mut rx = bus.subscribe();
    let agent = agent(model.clone(), settings).with_event_bus(bus);

    let outcome = run(&agent, dir.path(), "Write twelve files").await;
    assert!(outcome.success);

    let events = drain(&mut rx);
    let compressed = events.iter().find_map(|e| match e {
        AgentEvent::ContextCompressed {
            tokens_before,
            tokens_after,
            ..
        } => Some((*tokens_before, *tokens_after)),
        _ => None,
    });
    let (before, after) = compressed.expect("context was never compressed");
    assert!(after < before);

    let last = model.requests().pop().unwrap();
    assert_eq!(last.messages[0].role, Role::System);
    assert_eq!(last.messages[1].text(), "Write twelve files");
    assert!(
        last.messages
            .iter()
            .any(|m| m.critical && m.text().contains("Summary of"))
    );
}

#[tokio::test]
async fn workflow_steps_advance_from_assistant_text() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = Workflow {
        id: "release".into(),
        name: "Release".into(),
        description: String::new(),
        triggers: vec!["release".into()],
        steps: vec![
            WorkflowNode::new("1", "Bump version"),
            WorkflowNode::new("2", "Tag release"),
        ],
    };
    let model = ScriptedModel::new(vec![text("Bump version done. Now tagging the release.")]);
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let agent = agent(model.clone(), settings())
        .with_event_bus(bus)
        .with_workflow_matcher(Arc::new(KeywordWorkflowMatcher::new(vec![workflow])));

    run(&agent, dir.path(), "Cut a release").await;

    let first = model.requests().remove(0);
    assert!(
        first
            .messages
            .iter()
            .any(|m| m.critical && m.text().contains("## Workflow: Release"))
    );

    let updates: Vec<(String, String)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::WorkflowStepUpdate { step_id, status, .. } => Some((step_id, status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![
            ("1".to_string(), "in_progress".to_string()),
            ("1".to_string(), "completed".to_string()),
            ("2".to_string(), "in_progress".to_string()),
        ]
    );
}

#[tokio::test]
async fn rejected_answers_do_not_advance_the_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = Workflow {
        id: "release".into(),
        name: "Release".into(),
        description: String::new(),
        triggers: vec!["release".into()],
        steps: vec![
            WorkflowNode::new("1", "Bump version"),
            WorkflowNode::new("2", "Tag release"),
        ],
    };
    let model = ScriptedModel::new(vec![
        tools(vec![todo_call("t1", &[("1", "Bump version", "pending")])]),
        text("Bump version done."),
        tools(vec![todo_call("t2", &[("1", "Bump version", "completed")])]),
        text("The release is ready."),
    ]);
    let bus = Arc::new(EventBus::new(128));
    let mut rx = bus.subscribe();
    let agent = agent(model.clone(), settings())
        .with_event_bus(bus)
        .with_workflow_matcher(Arc::new(KeywordWorkflowMatcher::new(vec![workflow])));

    let outcome = run(&agent, dir.path(), "Cut a release").await;
    assert!(outcome.success);
    assert_eq!(outcome.final_text, "The release is ready.");
    assert!(
        !model.requests()[2]
            .messages
            .iter()
            .any(|m| m.role == Role::Assistant && m.text() == "Bump version done.")
    );

    let updates: Vec<(String, String)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            AgentEvent::WorkflowStepUpdate { step_id, status, .. } => Some((step_id, status)),
            _ => None,
        })
        .collect();
    assert_eq!(updates, vec![("1".to_string(), "in_progress".to_string())]);
}

#[tokio::test]
async fn cancel_during_approval_denies_and_skips_remaining_calls() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![tools(vec![
        ToolCall::new("w1", "write_file", json!({"path": "one.txt", "content": "1"})),
        ToolCall::new("w2", "write_file", json!({"path": "two.txt", "content": "2"})),
    ])]);
    let settings = AgentSettings {
        auto_approve: false,
        ..settings()
    };
    let bus = Arc::new(EventBus::new(128));
    let mut rx = bus.subscribe();
    let mut watcher = bus.subscribe();
    let agent = Arc::new(agent(model.clone(), settings).with_event_bus(bus));
    let handle = agent.handle();

    let canceller = tokio::spawn(async move {
        while let Ok(envelope) = watcher.recv().await {
            if matches!(envelope.event, AgentEvent::ApprovalNeeded { .. }) {
                handle.cancel();
                return;
            }
        }
    });

    let outcome = run(&agent, dir.path(), "Write two files").await;
    canceller.await.unwrap();

    assert_eq!(outcome.state, AgentState::Cancelled);
    assert!(!dir.path().join("one.txt").exists());
    assert!(!dir.path().join("two.txt").exists());
    assert_eq!(model.requests().len(), 1);

    let events = drain(&mut rx);
    let approvals = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::ApprovalNeeded { .. }))
        .count();
    assert_eq!(approvals, 1);
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::ToolExecuting { .. })));
    let denied = events.iter().find_map(|e| match e {
        AgentEvent::ToolResult { result } => Some(result.clone()),
        _ => None,
    });
    assert_eq!(denied.unwrap().error_code(), Some(ToolErrorCode::ApprovalDenied));
    assert_eq!(
        events.iter().filter(|e| matches!(e, AgentEvent::Cancelled)).count(),
        1
    );
}

#[tokio::test]
async fn todo_reminders_escalate_before_the_gate() {
    let dir = tempfile::tempdir().unwrap();
    let mut turns = vec![tools(vec![todo_call("t1", &[("1", "Deploy", "pending")])])];
    for i in 1..=8 {
        turns.push(Turn::Text(format!("Attempt {i}: deployment looks fine to me.")));
    }
    turns.push(tools(vec![todo_call("t2", &[("1", "Deploy", "completed")])]));
    turns.push(text("Deployed."));
    let model = ScriptedModel::new(turns);
    let agent = agent(model.clone(), settings());

    let outcome = run(&agent, dir.path(), "Deploy the service").await;
    assert!(outcome.success);
    assert!(!outcome.caveated);
    assert_eq!(outcome.final_text, "Deployed.");

    let requests = model.requests();
    assert_eq!(requests.len(), 11);

    // Reminder k lands in request k + 1
    let third = last_message_text(&requests[4]);
    assert!(third.contains("1 todo item(s) are still open"));
    assert!(!third.contains("Reminder"));

    let fourth = last_message_text(&requests[5]);
    assert!(fourth.contains("Reminder 4: the task is NOT finished"));
    assert!(fourth.contains("different approach"));
    assert!(last_message_text(&requests[7]).contains("Reminder 6"));

    let gate = last_message_text(&requests[8]);
    assert!(gate.contains("cannot be marked complete"));
    assert!(gate.contains("Todo 'Deploy' is still pending"));
    assert_eq!(requests[8].tool_choice, ToolChoice::Required);

    // A failed gate restarts the reminder count
    let after_gate = last_message_text(&requests[9]);
    assert!(after_gate.contains("1 todo item(s) are still open"));
    assert!(!after_gate.contains("Reminder"));
    assert_eq!(requests[9].tool_choice, ToolChoice::Required);
}

#[tokio::test]
async fn loop_runs_again_after_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let model = ScriptedModel::new(vec![text("Back to work.")]);
    let agent = agent(model.clone(), settings());
    let handle = agent.handle();

    handle.cancel();
    let first = run(&agent, dir.path(), "Stop before starting").await;
    assert_eq!(first.state, AgentState::Cancelled);
    assert!(model.requests().is_empty());
    assert!(handle.is_cancelled());

    let second = run(&agent, dir.path(), "Try again").await;
    assert!(second.success);
    assert_eq!(second.final_text, "Back to work.");
    assert!(!handle.is_cancelled());
}
