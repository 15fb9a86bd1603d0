//! Todo tool: the model's handle on the session checklist.

use async_trait::async_trait;
use holdfast_core::error::ToolError;
use holdfast_core::todo::TodoItem;
use holdfast_core::tool::{Tool, ToolContext, ToolOutput};
use serde_json::json;

pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the session todo list. Send every item each time with its id, \
         content and status (pending, in_progress, completed, cancelled). \
         Completed items cannot be reopened; omitted open items are kept, so \
         mark an item cancelled to drop it."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "cancelled"]
                            }
                        },
                        "required": ["id", "content", "status"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let items: Vec<TodoItem> = serde_json::from_value(arguments["todos"].clone())
            .map_err(|e| ToolError::InvalidArguments(format!("invalid todos: {e}")))?;

        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = items.iter().find(|i| !seen.insert(i.id.as_str())) {
            return Err(ToolError::InvalidArguments(format!(
                "duplicate todo id '{}'",
                dup.id
            )));
        }

        let update = ctx.todos.replace(items);
        let progress = ctx.todos.progress();

        let mut text = ctx.todos.render_checklist();
        text.push_str(&format!(
            "\n\nProgress: {}/{} closed ({}%)",
            progress.completed + progress.cancelled,
            progress.total,
            progress.percent()
        ));
        for id in &update.rejected {
            text.push_str(&format!(
                "\nWarning: '{id}' is already completed and was not reopened"
            ));
        }
        if !update.retained.is_empty() {
            text.push_str(&format!(
                "\nWarning: open items {} were omitted and kept; mark them cancelled to drop them",
                update.retained.join(", ")
            ));
        }
        for id in &update.flagged {
            text.push_str(&format!(
                "\nNote: '{id}' went straight from pending to completed"
            ));
        }

        let data = serde_json::to_value(progress).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "todo_write".into(),
            reason: e.to_string(),
        })?;
        Ok(ToolOutput::text(text).with_data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::{TodoLedger, TodoStatus};
    use std::sync::Arc;

    fn ctx(ledger: Arc<TodoLedger>) -> ToolContext {
        ToolContext::new("/proj", "s").with_todos(ledger)
    }

    #[tokio::test]
    async fn writes_list_and_reports_progress() {
        let ledger = Arc::new(TodoLedger::new());
        let out = TodoWriteTool
            .execute(
                json!({"todos": [
                    {"id": "1", "content": "Create dir", "status": "completed"},
                    {"id": "2", "content": "Write file", "status": "in_progress"}
                ]}),
                &ctx(ledger.clone()),
            )
            .await
            .unwrap();

        assert!(out.content.contains("[x] Create dir"));
        assert!(out.content.contains("[~] Write file"));
        assert!(out.content.contains("1/2 closed (50%)"));
        assert_eq!(out.data.unwrap()["in_progress"], 1);
        assert_eq!(ledger.progress().total, 2);
    }

    #[tokio::test]
    async fn completed_items_are_not_reopened() {
        let ledger = Arc::new(TodoLedger::new());
        ledger.restore(vec![TodoItem::new("1", "Ship", TodoStatus::Completed)]);

        let out = TodoWriteTool
            .execute(
                json!({"todos": [{"id": "1", "content": "Ship", "status": "pending"}]}),
                &ctx(ledger.clone()),
            )
            .await
            .unwrap();

        assert!(out.content.contains("not reopened"));
        assert_eq!(ledger.snapshot()[0].status, TodoStatus::Completed);
    }

    #[tokio::test]
    async fn omitted_open_items_are_retained() {
        let ledger = Arc::new(TodoLedger::new());
        ledger.restore(vec![
            TodoItem::new("1", "A", TodoStatus::Pending),
            TodoItem::new("2", "B", TodoStatus::Pending),
        ]);

        let out = TodoWriteTool
            .execute(
                json!({"todos": [{"id": "1", "content": "A", "status": "completed"}]}),
                &ctx(ledger.clone()),
            )
            .await
            .unwrap();

        assert!(out.content.contains("omitted and kept"));
        assert!(ledger.has_outstanding());
    }

    #[tokio::test]
    async fn bad_status_is_invalid_arguments() {
        let err = TodoWriteTool
            .execute(
                json!({"todos": [{"id": "1", "content": "A", "status": "done"}]}),
                &ctx(Arc::new(TodoLedger::new())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn duplicate_ids_are_refused() {
        let err = TodoWriteTool
            .execute(
                json!({"todos": [
                    {"id": "1", "content": "A", "status": "pending"},
                    {"id": "1", "content": "B", "status": "pending"}
                ]}),
                &ctx(Arc::new(TodoLedger::new())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
