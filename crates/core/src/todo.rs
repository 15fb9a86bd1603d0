//! Todo ledger: the session's task checklist.
//!
//! The ledger is what stops the loop from accepting a "done" answer while
//! work is still open. Status transitions are guarded: once an item is
//! completed it can never go back to pending or in-progress.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Status of a single todo item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    /// Pending and in-progress items block completion.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    /// Checklist icon used in summaries and nudges.
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Pending => "[ ]",
            Self::InProgress => "[~]",
            Self::Completed => "[x]",
            Self::Cancelled => "[-]",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

impl TodoItem {
    pub fn new(id: impl Into<String>, content: impl Into<String>, status: TodoStatus) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            status,
        }
    }
}

/// What happened to a requested status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Legal but suspicious (pending → completed without in-progress).
    Flagged,
    /// Illegal (completed → pending / in-progress); old status kept.
    Rejected,
    Unchanged,
    UnknownItem,
}

/// Aggregated progress over the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoProgress {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl TodoProgress {
    pub fn outstanding(&self) -> usize {
        self.pending + self.in_progress
    }

    /// Share of items that are closed (completed or cancelled), 0–100.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (((self.completed + self.cancelled) * 100) / self.total) as u8
    }
}

/// Summary of one `replace` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TodoUpdate {
    pub added: usize,
    pub changed: usize,
    pub rejected: Vec<String>,
    pub flagged: Vec<String>,
    /// Outstanding items the caller omitted; they are kept.
    pub retained: Vec<String>,
}

#[derive(Debug, Default)]
struct LedgerState {
    items: Vec<TodoItem>,
    warnings: Vec<String>,
    notes: Vec<String>,
}

/// Thread-safe todo checklist for one session.
#[derive(Debug, Default)]
pub struct TodoLedger {
    state: Mutex<LedgerState>,
}

impl TodoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply a full todo list from the model.
    ///
    /// Items are merged by id through the transition guard. Outstanding items
    /// missing from `incoming` stay on the ledger; to drop one the model has
    /// to mark it cancelled.
    pub fn replace(&self, incoming: Vec<TodoItem>) -> TodoUpdate {
        let mut state = self.state();
        let mut update = TodoUpdate::default();
        let mut next: Vec<TodoItem> = Vec::with_capacity(incoming.len());

        for item in incoming {
            let existing = state.items.iter().find(|e| e.id == item.id).cloned();
            match existing {
                Some(existing) => {
                    let mut merged = existing.clone();
                    merged.content = item.content.clone();
                    match guard_transition(existing.status, item.status) {
                        TransitionOutcome::Rejected => {
                            let msg = reject_message(&item.id, existing.status, item.status);
                            warn!(todo_id = %item.id, "{msg}");
                            state.warnings.push(msg);
                            update.rejected.push(item.id.clone());
                        }
                        TransitionOutcome::Flagged => {
                            merged.status = item.status;
                            state.notes.push(flag_message(&item.id));
                            update.flagged.push(item.id.clone());
                            update.changed += 1;
                        }
                        TransitionOutcome::Applied => {
                            merged.status = item.status;
                            update.changed += 1;
                        }
                        TransitionOutcome::Unchanged | TransitionOutcome::UnknownItem => {}
                    }
                    next.push(merged);
                }
                None => {
                    update.added += 1;
                    next.push(item);
                }
            }
        }

        let omitted: Vec<TodoItem> = state
            .items
            .iter()
            .filter(|old| old.status.is_outstanding() && !next.iter().any(|n| n.id == old.id))
            .cloned()
            .collect();
        for old in omitted {
            update.retained.push(old.id.clone());
            next.push(old);
        }
        if !update.retained.is_empty() {
            let msg = format!(
                "todo list update omitted outstanding items {:?}; they were kept (mark them cancelled to drop them)",
                update.retained
            );
            warn!("{msg}");
            state.warnings.push(msg);
        }

        state.items = next;
        debug!(
            added = update.added,
            changed = update.changed,
            rejected = update.rejected.len(),
            "Todo ledger updated"
        );
        update
    }

    /// Change the status of one item through the transition guard.
    pub fn set_status(&self, id: &str, status: TodoStatus) -> TransitionOutcome {
        let mut state = self.state();
        let Some(pos) = state.items.iter().position(|i| i.id == id) else {
            return TransitionOutcome::UnknownItem;
        };
        let current = state.items[pos].status;
        let outcome = guard_transition(current, status);
        match outcome {
            TransitionOutcome::Rejected => {
                let msg = reject_message(id, current, status);
                warn!(todo_id = %id, "{msg}");
                state.warnings.push(msg);
            }
            TransitionOutcome::Flagged => {
                state.items[pos].status = status;
                state.notes.push(flag_message(id));
            }
            TransitionOutcome::Applied => state.items[pos].status = status,
            TransitionOutcome::Unchanged | TransitionOutcome::UnknownItem => {}
        }
        outcome
    }

    /// Load items verbatim (e.g. from a persisted snapshot), bypassing guards.
    pub fn restore(&self, items: Vec<TodoItem>) {
        self.state().items = items;
    }

    /// Clear items, warnings and notes.
    pub fn reset(&self) {
        *self.state() = LedgerState::default();
    }

    pub fn snapshot(&self) -> Vec<TodoItem> {
        self.state().items.clone()
    }

    pub fn outstanding(&self) -> Vec<TodoItem> {
        self.state()
            .items
            .iter()
            .filter(|i| i.status.is_outstanding())
            .cloned()
            .collect()
    }

    pub fn has_outstanding(&self) -> bool {
        self.state().items.iter().any(|i| i.status.is_outstanding())
    }

    pub fn progress(&self) -> TodoProgress {
        let state = self.state();
        let mut progress = TodoProgress {
            total: state.items.len(),
            ..Default::default()
        };
        for item in &state.items {
            match item.status {
                TodoStatus::Pending => progress.pending += 1,
                TodoStatus::InProgress => progress.in_progress += 1,
                TodoStatus::Completed => progress.completed += 1,
                TodoStatus::Cancelled => progress.cancelled += 1,
            }
        }
        progress
    }

    pub fn warnings(&self) -> Vec<String> {
        self.state().warnings.clone()
    }

    pub fn notes(&self) -> Vec<String> {
        self.state().notes.clone()
    }

    /// One line per item: status icon + content. Never truncated.
    pub fn render_checklist(&self) -> String {
        self.state()
            .items
            .iter()
            .map(|i| format!("{} {}", i.status.icon(), i.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn guard_transition(from: TodoStatus, to: TodoStatus) -> TransitionOutcome {
    use TodoStatus::*;
    match (from, to) {
        (a, b) if a == b => TransitionOutcome::Unchanged,
        (Completed, Pending | InProgress) => TransitionOutcome::Rejected,
        (Pending, Completed) => TransitionOutcome::Flagged,
        _ => TransitionOutcome::Applied,
    }
}

fn reject_message(id: &str, from: TodoStatus, to: TodoStatus) -> String {
    format!(
        "rejected todo '{id}' transition {} -> {}; completed items cannot be reopened",
        from.as_str(),
        to.as_str()
    )
}

fn flag_message(id: &str) -> String {
    format!("todo '{id}' went pending -> completed without being marked in_progress")
}

/// Process-wide todo ledgers keyed by session id.
#[derive(Debug, Default)]
pub struct TodoBoard {
    ledgers: Mutex<HashMap<String, Arc<TodoLedger>>>,
}

impl TodoBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledgers(&self) -> MutexGuard<'_, HashMap<String, Arc<TodoLedger>>> {
        self.ledgers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fresh ledger for a starting session, replacing any previous one.
    pub fn reset(&self, session_id: &str) -> Arc<TodoLedger> {
        let ledger = Arc::new(TodoLedger::new());
        self.ledgers()
            .insert(session_id.to_string(), Arc::clone(&ledger));
        ledger
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<TodoLedger>> {
        self.ledgers().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<TodoLedger>> {
        self.ledgers().remove(session_id)
    }
}
