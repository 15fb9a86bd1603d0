//! Per-session record of what tool calls did, read by the completion gate.

use std::path::PathBuf;

use holdfast_core::error::ToolErrorCode;
use holdfast_core::tool::{ToolCall, ToolResult};
use holdfast_security::{display_relative, validate_path};

/// How a call's outcome counts toward the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Only looks at the project; its failures never block completion
    ReadOnly,
    /// Writes files; success supersedes earlier failures on the same path
    ModifiesFiles,
    Other,
}

impl CallKind {
    /// Classify a tool from what it does to the project.
    pub fn of(modifies_files: bool, read_only: bool) -> Self {
        if modifies_files {
            Self::ModifiesFiles
        } else if read_only {
            Self::ReadOnly
        } else {
            Self::Other
        }
    }
}

/// One (tool, target) pair and its latest outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub tool: String,
    pub target: String,
    pub success: bool,
    /// Error text of the latest failure
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionTracker {
    root: Option<PathBuf>,
    outcomes: Vec<ToolOutcome>,
    changed_files: Vec<String>,
    unverified: Vec<String>,
    lint_pending: bool,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key path targets relative to `root`, so `./a.rs`, `a.rs` and
    /// `/root/a.rs` are one file.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Fold one executed call into the record. `lint_command` is the
    /// configured lint command, if any.
    pub fn record(
        &mut self,
        call: &ToolCall,
        result: &ToolResult,
        kind: CallKind,
        lint_command: Option<&str>,
    ) {
        let code = result.error_code();
        if matches!(code, Some(ToolErrorCode::ApprovalDenied | ToolErrorCode::Cancelled)) {
            return;
        }

        let target = self.target_of(call);
        if kind != CallKind::ReadOnly {
            self.record_outcome(result, &target, kind);
        }

        if kind == CallKind::ModifiesFiles && !target.is_empty() {
            let verified = result.success
                && result
                    .data
                    .as_ref()
                    .and_then(|d| d.get("verified"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
            let wrote = result.success || code == Some(ToolErrorCode::VerificationFailed);

            if wrote {
                if !self.changed_files.contains(&target) {
                    self.changed_files.push(target.clone());
                }
                if lint_command.is_some() {
                    self.lint_pending = true;
                }
            }
            if verified {
                self.unverified.retain(|p| p != &target);
            } else if wrote && !self.unverified.contains(&target) {
                self.unverified.push(target);
            }
        }

        if let Some(lint) = lint_command
            && result.success
            && result.tool_name == "run_command"
            && call.str_arg("command").is_some_and(|c| c.contains(lint))
        {
            self.lint_pending = false;
        }
    }

    fn record_outcome(&mut self, result: &ToolResult, target: &str, kind: CallKind) {
        if result.success {
            // A write to a path settles every earlier failure on it, and a
            // command settles failures of any command it extends.
            self.outcomes.retain(|o| {
                let superseded = match kind {
                    CallKind::ModifiesFiles => o.target == target,
                    _ => o.tool == result.tool_name && extends(target, &o.target),
                };
                o.success || !superseded
            });
        }

        let outcome = ToolOutcome {
            tool: result.tool_name.clone(),
            target: target.to_string(),
            success: result.success,
            error: result.error.as_ref().map(|e| e.message.clone()),
        };
        match self
            .outcomes
            .iter_mut()
            .find(|o| o.tool == outcome.tool && o.target == outcome.target)
        {
            Some(existing) => *existing = outcome,
            None => self.outcomes.push(outcome),
        }
    }

    /// Keys whose most recent outcome is a failure.
    pub fn unresolved_failures(&self) -> Vec<&ToolOutcome> {
        self.outcomes.iter().filter(|o| !o.success).collect()
    }

    pub fn unverified_files(&self) -> &[String] {
        &self.unverified
    }

    pub fn changed_files(&self) -> &[String] {
        &self.changed_files
    }

    pub fn lint_pending(&self) -> bool {
        self.lint_pending
    }

    /// What a call acted on: its path, command or search pattern.
    fn target_of(&self, call: &ToolCall) -> String {
        if let Some(path) = call.str_arg("path") {
            return self.normalize_path(path);
        }
        call.str_arg("command")
            .or_else(|| call.str_arg("pattern"))
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    fn normalize_path(&self, path: &str) -> String {
        let Some(root) = &self.root else {
            return path.trim_start_matches("./").to_string();
        };
        match validate_path(path, root) {
            Ok(resolved) => display_relative(&resolved, root),
            Err(_) => path.to_string(),
        }
    }
}

/// Whether command `later` is `earlier` or `earlier` with more arguments.
fn extends(later: &str, earlier: &str) -> bool {
    later
        .strip_prefix(earlier)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}
