//! File edit tool: search-and-replace with fuzzy fallback.
//!
//! The search text is located with the strategies in [`crate::fuzzy`]. An
//! ambiguous search is refused rather than guessed, and every write is read
//! back before the edit is reported as done.

use async_trait::async_trait;
use holdfast_core::error::ToolError;
use holdfast_core::tool::{RiskLevel, Tool, ToolContext, ToolOutput};
use holdfast_security::{display_relative, validate_path};
use serde_json::json;
use tracing::debug;

use crate::file_write::verify_written;
use crate::fuzzy::{FuzzyError, MatchStrategy, apply_edit};

pub struct FileEditTool;

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace text in a file. old_string must identify exactly one location \
         unless replace_all is true; include surrounding lines to disambiguate. \
         Minor whitespace and indentation differences are tolerated."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the project root"
                },
                "old_string": {
                    "type": "string",
                    "description": "Text to find"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace every occurrence instead of requiring a unique match"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    fn modifies_files(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let old = arguments["old_string"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'old_string' argument".into()))?;
        let new = arguments["new_string"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'new_string' argument".into()))?;
        let replace_all = arguments["replace_all"].as_bool().unwrap_or(false);

        let resolved = validate_path(path, &ctx.project_root)?;
        let rel = display_relative(&resolved, &ctx.project_root);

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "edit_file".into(),
                reason: format!("failed to read {rel}: {e}"),
            })?;

        let edit = apply_edit(&content, old, new, replace_all).map_err(|e| match e {
            FuzzyError::EmptySearch => {
                ToolError::InvalidArguments("old_string must not be empty".into())
            }
            FuzzyError::MultipleMatches { count, .. } => ToolError::MultipleMatches { count },
            FuzzyError::NotFound => ToolError::MatchNotFound { path: rel.clone() },
        })?;

        tokio::fs::write(&resolved, &edit.new_content)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "edit_file".into(),
                reason: format!("failed to write {rel}: {e}"),
            })?;
        verify_written(&resolved, &edit.new_content).await?;

        debug!(
            path = %rel,
            strategy = %edit.strategy,
            replacements = edit.replacements(),
            "File edited"
        );

        let mut summary = format!(
            "Edited {rel}: {} replacement(s), verified",
            edit.replacements()
        );
        if edit.strategy != MatchStrategy::Exact {
            summary.push_str(&format!(" ({} match)", edit.strategy));
        }

        Ok(ToolOutput::text(summary).with_data(json!({
            "path": rel,
            "verified": true,
            "strategy": edit.strategy.as_str(),
            "replacements": edit.replacements(),
        })))
    }
}
