//! File read tool: read file contents inside the project root.

use async_trait::async_trait;
use holdfast_core::error::ToolError;
use holdfast_core::tool::{Tool, ToolContext, ToolOutput};
use holdfast_security::{display_relative, validate_path};
use serde_json::json;

/// Lines returned when the caller gives no explicit range.
const MAX_LINES: usize = 2000;

pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the project. Paths are relative to the project root. \
         Optionally pass start_line/end_line (1-based, inclusive) to read a range."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path, relative to the project root"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to return (1-based)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to return (inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let resolved = validate_path(path, &ctx.project_root)?;
        let rel = display_relative(&resolved, &ctx.project_root);

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "read_file".into(),
                reason: format!("failed to read {rel}: {e}"),
            })?;

        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();
        let start = arguments["start_line"].as_u64().unwrap_or(1).max(1) as usize;
        let requested_end = arguments["end_line"].as_u64().map(|n| n as usize);
        let end = requested_end
            .unwrap_or(start.saturating_add(MAX_LINES - 1))
            .min(total);

        if total > 0 && start > total {
            return Err(ToolError::InvalidArguments(format!(
                "start_line {start} is past the end of {rel} ({total} lines)"
            )));
        }

        let slice = if start <= end { &lines[start - 1..end] } else { &[][..] };
        let mut output = slice
            .iter()
            .enumerate()
            .map(|(i, line)| format!("{:>6}\t{line}", start + i))
            .collect::<Vec<_>>()
            .join("\n");

        if requested_end.is_none() && end < total {
            output.push_str(&format!(
                "\n... ({} more lines; pass start_line={} to continue)",
                total - end,
                end + 1
            ));
        }

        Ok(ToolOutput::text(output).with_data(json!({
            "path": rel,
            "lines": total,
        })))
    }
}
