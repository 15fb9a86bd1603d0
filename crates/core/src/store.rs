//! Store contracts for state that outlives a single loop run.
//!
//! Two narrow interfaces: the todo snapshot and a per-session execution
//! history. On-disk layout belongs to the implementation
//! (see `holdfast-store`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::todo::TodoItem;

/// What previous runs of a session did, replayed as session memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    pub session_id: String,

    /// Free-text background: the last request and how it ended
    #[serde(default)]
    pub background: String,

    /// Every file changed across runs, in first-seen order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed_files: Vec<String>,

    /// Things left unresolved at the end of the last run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_issues: Vec<String>,

    pub updated_at: DateTime<Utc>,
}

impl ExecutionHistory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            background: String::new(),
            changed_files: Vec::new(),
            pending_issues: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Fold one run into the history. Changed files accumulate; background
    /// and pending issues describe only the latest run.
    pub fn record_run(
        &mut self,
        background: impl Into<String>,
        changed_files: impl IntoIterator<Item = String>,
        pending_issues: Vec<String>,
    ) {
        self.background = background.into();
        for file in changed_files {
            if !self.changed_files.contains(&file) {
                self.changed_files.push(file);
            }
        }
        self.pending_issues = pending_issues;
        self.updated_at = Utc::now();
    }

    /// Render as the text of a session-memory system message.
    pub fn render(&self) -> String {
        let mut out = String::from("## Session memory\n");
        if !self.background.is_empty() {
            out.push_str(&format!("\nBackground: {}\n", self.background));
        }
        if !self.changed_files.is_empty() {
            out.push_str("\nFiles changed in earlier runs:\n");
            for file in &self.changed_files {
                out.push_str(&format!("- {file}\n"));
            }
        }
        if !self.pending_issues.is_empty() {
            out.push_str("\nUnresolved from the last run:\n");
            for issue in &self.pending_issues {
                out.push_str(&format!("- {issue}\n"));
            }
        }
        out
    }
}

/// Persists the todo ledger snapshot per session.
#[async_trait]
pub trait TodoStore: Send + Sync {
    fn name(&self) -> &str;

    async fn load_todos(&self, session_id: &str) -> Result<Option<Vec<TodoItem>>, StoreError>;

    async fn save_todos(&self, session_id: &str, items: &[TodoItem]) -> Result<(), StoreError>;
}

/// Persists execution histories per session.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    fn name(&self) -> &str;

    async fn load_history(&self, session_id: &str)
    -> Result<Option<ExecutionHistory>, StoreError>;

    async fn save_history(&self, history: &ExecutionHistory) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_run_accumulates_files_once() {
        let mut history = ExecutionHistory::new("s-1");
        history.record_run("first", vec!["a.rs".to_string()], vec![]);
        history.record_run(
            "second",
            vec!["a.rs".to_string(), "b.rs".to_string()],
            vec!["tests failing".into()],
        );

        assert_eq!(history.background, "second");
        assert_eq!(history.changed_files, vec!["a.rs", "b.rs"]);
        assert_eq!(history.pending_issues, vec!["tests failing"]);
    }

    #[test]
    fn render_skips_empty_sections() {
        let mut history = ExecutionHistory::new("s-1");
        history.record_run("did a thing", Vec::<String>::new(), vec![]);
        let text = history.render();
        assert!(text.contains("Background: did a thing"));
        assert!(!text.contains("Files changed"));
        assert!(!text.contains("Unresolved"));
    }
}
