//! Built-in tool implementations for Holdfast.
//!
//! Tools give the agent the ability to work on a project: read, write and
//! edit files, search them, run shell commands, keep a todo list, and hand
//! a subtask to a sub-agent. [`ToolExecutor`] runs calls against a
//! registry and turns every outcome into a `ToolResult`.

pub mod executor;
pub mod file_edit;
pub mod file_read;
pub mod file_write;
pub mod fuzzy;
pub mod grep_search;
pub mod shell;
pub mod task;
pub mod todo_write;

use std::sync::Arc;
use std::time::Duration;

use holdfast_config::ToolSettings;
use holdfast_core::tool::ToolRegistry;

pub use executor::{ToolExecutor, validate_arguments};
pub use fuzzy::{FuzzyEdit, FuzzyError, MatchResult, MatchStrategy, apply_edit, find_matches};

/// Create a registry with every built-in tool.
///
/// `str_replace` and `shell` are accepted as aliases for `edit_file` and
/// `run_command`.
pub fn default_registry(settings: &ToolSettings) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(file_read::FileReadTool));
    registry.register(Arc::new(file_write::FileWriteTool));
    registry.register(Arc::new(file_edit::FileEditTool));
    registry.register(Arc::new(grep_search::GrepSearchTool::new(
        settings.max_search_results,
        settings.max_search_file_bytes,
    )));
    registry.register(Arc::new(shell::ShellTool::new(Duration::from_secs(
        settings.shell_timeout_secs,
    ))));
    registry.register(Arc::new(todo_write::TodoWriteTool));
    registry.register(Arc::new(task::TaskTool::default()));
    registry.alias("str_replace", "edit_file");
    registry.alias("shell", "run_command");
    registry
}

/// Executor over [`default_registry`] using the configured default deadline.
pub fn default_executor(settings: &ToolSettings) -> ToolExecutor {
    ToolExecutor::new(Arc::new(default_registry(settings)))
        .with_default_timeout(Duration::from_secs(settings.default_timeout_secs))
}
