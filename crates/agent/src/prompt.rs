//! System prompt assembly.
//!
//! The loop treats the system prompt as opaque text. Hosts plug in their
//! own [`PromptAssembler`]; [`DefaultPromptAssembler`] covers the rules
//! the loop itself enforces.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What kind of agent the prompt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Top-level coding agent
    #[default]
    Agent,
    /// Child agent running a delegated task
    SubAgent,
}

/// Inputs to prompt assembly.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub mode: AgentMode,
    pub project_root: PathBuf,
    pub open_files: Vec<String>,
    pub model_id: String,
}

pub trait PromptAssembler: Send + Sync {
    fn assemble(&self, request: &PromptRequest) -> String;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultPromptAssembler;

impl PromptAssembler for DefaultPromptAssembler {
    fn assemble(&self, request: &PromptRequest) -> String {
        let mut prompt = String::from(
            "You are an autonomous coding agent working inside a software project. \
             You act only through the provided tools.\n",
        );

        prompt.push_str(&format!(
            "\nProject root: {}\nAll file paths are relative to the project root.\n",
            request.project_root.display()
        ));

        prompt.push_str(
            "\n## Rules\n\
             - For any task with more than one step, write a todo list with todo_write first \
             and keep it current: mark an item in_progress before working on it and completed \
             right after.\n\
             - Read a file before editing it. Keep edit_file old_string unique by including \
             surrounding lines.\n\
             - A tool error is information, not the end: read it, fix the cause, retry.\n\
             - Do not claim the task is finished while todo items are open or a failed step \
             has not been fixed; the session will not end until they are resolved.\n\
             - When everything is done, reply with a short summary and no tool calls.\n",
        );

        if request.mode == AgentMode::SubAgent {
            prompt.push_str(
                "\nYou are running a delegated subtask. Complete only that subtask and \
                 answer with what the caller needs. You cannot delegate further.\n",
            );
        }

        if !request.open_files.is_empty() {
            prompt.push_str("\n## Open files\n");
            for file in &request.open_files {
                prompt.push_str(&format!("- {file}\n"));
            }
        }

        prompt
    }
}
