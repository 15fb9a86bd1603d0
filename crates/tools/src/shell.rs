//! Shell tool: run a command in the project root.
//!
//! Destructive commands are refused before a process is spawned; everything
//! else reaches the shell only after approval (the tool is high risk).

use async_trait::async_trait;
use holdfast_core::error::ToolError;
use holdfast_core::tool::{RiskLevel, Tool, ToolContext, ToolOutput};
use holdfast_security::validate_command;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    timeout: Duration,
}

impl ShellTool {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(120))
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the project root and return stdout/stderr. \
         Use this for builds, tests, git operations, etc."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;
        if command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("command must not be empty".into()));
        }

        validate_command(command)?;

        debug!(command = %command, "Executing shell command");
        let output = run_shell(command, ctx).await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "run_command".into(),
            reason: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let text = if stderr.trim().is_empty() {
            stdout.trim_end().to_string()
        } else {
            format!("{}\n[stderr]: {}", stdout.trim_end(), stderr.trim_end())
        };

        if !output.status.success() {
            warn!(command = %command, exit_code = code, "Command failed");
            return Err(ToolError::ExecutionFailed {
                tool_name: "run_command".into(),
                reason: format!("exit code {code}\n{}", text.trim()),
            });
        }

        Ok(ToolOutput::text(text.trim().to_string()).with_data(json!({
            "command": command,
            "exit_code": code,
        })))
    }
}

async fn run_shell(command: &str, ctx: &ToolContext) -> std::io::Result<std::process::Output> {
    let mut cmd = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    };
    cmd.current_dir(&ctx.project_root)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
}
