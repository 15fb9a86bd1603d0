//! Task tool: delegate a self-contained instruction to a sub-agent.

use async_trait::async_trait;
use holdfast_core::error::ToolError;
use holdfast_core::tool::{RiskLevel, Tool, ToolContext, ToolOutput};
use serde_json::json;
use std::time::Duration;
use tracing::info;

pub struct TaskTool {
    timeout: Duration,
}

impl TaskTool {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TaskTool {
    fn default() -> Self {
        Self::new(Duration::from_secs(900))
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained subtask to a sub-agent with its own context. \
         The sub-agent cannot delegate further. Returns its final answer."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "instruction": {
                    "type": "string",
                    "description": "Complete instruction for the sub-agent"
                }
            },
            "required": ["instruction"]
        })
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Low
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let instruction = arguments["instruction"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'instruction' argument".into()))?;

        let Some(spawner) = ctx.spawner.as_ref() else {
            return Err(ToolError::ExecutionFailed {
                tool_name: "task".into(),
                reason: "sub-agents are not available in this session".into(),
            });
        };

        info!(session = %ctx.session_id, "Delegating task to sub-agent");
        let answer = spawner.spawn(instruction.to_string(), ctx).await?;
        Ok(ToolOutput::text(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::SubAgentSpawner;
    use std::sync::Arc;

    struct Upcase;

    #[async_trait]
    impl SubAgentSpawner for Upcase {
        async fn spawn(&self, instruction: String, _ctx: &ToolContext) -> Result<String, ToolError> {
            Ok(instruction.to_uppercase())
        }
    }

    #[tokio::test]
    async fn delegates_to_spawner() {
        let ctx = ToolContext::new("/proj", "s").with_spawner(Arc::new(Upcase));
        let out = TaskTool::default()
            .execute(json!({"instruction": "count files"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.content, "COUNT FILES");
    }

    #[tokio::test]
    async fn without_spawner_fails() {
        let ctx = ToolContext::new("/proj", "s");
        let err = TaskTool::default()
            .execute(json!({"instruction": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[test]
    fn task_is_low_risk() {
        assert_eq!(TaskTool::default().risk_level(), RiskLevel::Low);
    }
}
