//! File write tool: create or overwrite a file, then read it back.

use async_trait::async_trait;
use holdfast_core::error::ToolError;
use holdfast_core::tool::{RiskLevel, Tool, ToolContext, ToolOutput};
use holdfast_security::{display_relative, validate_path};
use serde_json::json;
use std::path::Path;
use tracing::debug;

pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the project. Creates the file (and parent \
         directories) if it doesn't exist, overwrites it if it does."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "The full file content to write"
                }
            },
            "required": ["path", "content"]
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
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let resolved = validate_path(path, &ctx.project_root)?;
        let rel = display_relative(&resolved, &ctx.project_root);
        let created = !tokio::fs::try_exists(&resolved).await.unwrap_or(false);

        if let Some(parent) = resolved.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Err(write_failed(format!("failed to create directory for {rel}: {e}")));
        }

        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| write_failed(format!("failed to write {rel}: {e}")))?;
        verify_written(&resolved, content).await?;

        debug!(path = %rel, bytes = content.len(), created, "File written");
        let verb = if created { "Created" } else { "Wrote" };
        Ok(
            ToolOutput::text(format!("{verb} {rel} ({} bytes, verified)", content.len())).with_data(
                json!({
                    "path": rel,
                    "verified": true,
                    "created": created,
                }),
            ),
        )
    }
}

fn write_failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "write_file".into(),
        reason,
    }
}

/// Read `path` back and compare with what was meant to land on disk.
pub(crate) async fn verify_written(path: &Path, expected: &str) -> Result<(), ToolError> {
    match tokio::fs::read_to_string(path).await {
        Ok(actual) if actual == expected => Ok(()),
        _ => Err(ToolError::VerificationFailed {
            path: path.display().to_string(),
        }),
    }
}
