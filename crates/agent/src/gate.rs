//! Completion gate: decides whether a final answer may end the session.

use holdfast_core::todo::TodoLedger;

use crate::tracker::ExecutionTracker;

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateVerdict {
    pub reasons: Vec<String>,
}

impl GateVerdict {
    pub fn passed(&self) -> bool {
        self.reasons.is_empty()
    }

    /// Itemized reasons, one per line.
    pub fn render(&self) -> String {
        self.reasons
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {r}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionGate {
    lint_command: Option<String>,
}

impl CompletionGate {
    pub fn new(lint_command: Option<String>) -> Self {
        Self {
            lint_command: lint_command.filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn lint_command(&self) -> Option<&str> {
        self.lint_command.as_deref()
    }

    pub fn evaluate(&self, todos: &TodoLedger, tracker: &ExecutionTracker) -> GateVerdict {
        let mut reasons = Vec::new();

        for item in todos.outstanding() {
            reasons.push(format!(
                "Todo '{}' is still {}",
                item.content,
                item.status.as_str()
            ));
        }

        for failure in tracker.unresolved_failures() {
            let target = if failure.target.is_empty() {
                String::new()
            } else {
                format!(" on {}", failure.target)
            };
            reasons.push(format!(
                "Last {}{target} failed and has not succeeded since: {}",
                failure.tool,
                failure.error.as_deref().unwrap_or("unknown error")
            ));
        }

        for path in tracker.unverified_files() {
            reasons.push(format!("Edit to {path} was not verified"));
        }

        if let Some(lint) = &self.lint_command
            && tracker.lint_pending()
        {
            reasons.push(format!(
                "Files changed since the last successful `{lint}` run"
            ));
        }

        GateVerdict { reasons }
    }
}
