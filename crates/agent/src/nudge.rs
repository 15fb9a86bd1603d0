//! Corrective system messages injected when the model tries to stop early,
//! plus the head-and-tail truncation applied to tool output.

use holdfast_core::todo::{TodoItem, TodoLedger};

use crate::gate::GateVerdict;

pub fn stall() -> String {
    "You are repeating the same answer without making progress. Stop restating \
     the plan and call a tool to take the next concrete step."
        .to_string()
}

/// Reminder listing open todos. `attempt` is 1-based; `soft_limit` is the
/// last attempt that gets the plain reminder.
pub fn outstanding_todos(items: &[TodoItem], attempt: u32, soft_limit: u32) -> String {
    let list = items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {} {}", i + 1, item.status.icon(), item.content))
        .collect::<Vec<_>>()
        .join("\n");

    if attempt <= soft_limit {
        format!(
            "You ended your turn but {} todo item(s) are still open:\n{list}\n\n\
             Continue working on them now. Update the todo list with todo_write as items \
             are completed, or mark an item cancelled if it no longer applies.",
            items.len()
        )
    } else {
        format!(
            "Reminder {attempt}: the task is NOT finished. These todo items are still open:\n{list}\n\n\
             What you are doing is not closing them. Try a different approach: re-read the \
             relevant files, break the item into smaller steps, or cancel items that are \
             genuinely not needed, with a reason."
        )
    }
}

pub fn gate_failed(verdict: &GateVerdict) -> String {
    format!(
        "The task cannot be marked complete yet:\n{}\n\nResolve each item, then answer again.",
        verdict.render()
    )
}

pub fn gate_exhausted(verdict: &GateVerdict) -> String {
    format!(
        "Completion checks still fail after several attempts:\n{}\n\n\
         Write your final answer now. State plainly which of these items remain unresolved \
         and why, so the user can follow up.",
        verdict.render()
    )
}

/// Closing summary injected when the iteration cap is hit.
pub fn max_iterations(todos: &TodoLedger, max: u32) -> String {
    let items = todos.snapshot();
    let (done, open): (Vec<&TodoItem>, Vec<&TodoItem>) =
        items.iter().partition(|i| !i.status.is_outstanding());

    let mut out = format!(
        "The iteration limit ({max}) has been reached. No more tools can be called. \
         Write a final answer summarizing what was done and what remains.\n"
    );
    if !done.is_empty() {
        out.push_str("\nCompleted:\n");
        for item in done {
            out.push_str(&format!("{} {}\n", item.status.icon(), item.content));
        }
    }
    if !open.is_empty() {
        out.push_str("\nRemaining:\n");
        for item in open {
            out.push_str(&format!("{} {}\n", item.status.icon(), item.content));
        }
    }
    out
}

/// Keep the head and tail of `text`, joined by a marker, when it exceeds
/// `max_chars` characters.
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head_chars = max_chars * 2 / 3;
    let tail_chars = max_chars - head_chars;
    let head: String = text.chars().take(head_chars).collect();
    let tail: String = text.chars().skip(total - tail_chars).collect();
    format!(
        "{head}\n\n[... {} characters truncated ...]\n\n{tail}",
        total - head_chars - tail_chars
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::TodoStatus;

    fn open_items() -> Vec<TodoItem> {
        vec![
            TodoItem::new("1", "Write parser", TodoStatus::InProgress),
            TodoItem::new("2", "Add tests", TodoStatus::Pending),
        ]
    }

    #[test]
    fn todo_reminder_escalates() {
        let soft = outstanding_todos(&open_items(), 1, 3);
        assert!(soft.contains("1. [~] Write parser"));
        assert!(soft.contains("2. [ ] Add tests"));
        assert!(!soft.contains("different approach"));

        let hard = outstanding_todos(&open_items(), 4, 3);
        assert!(hard.contains("different approach"));
        assert!(hard.contains("2. [ ] Add tests"));
    }

    #[test]
    fn iteration_summary_splits_done_and_remaining() {
        let ledger = TodoLedger::new();
        ledger.restore(vec![
            TodoItem::new("1", "Plan", TodoStatus::Completed),
            TodoItem::new("2", "Build", TodoStatus::Pending),
        ]);
        let text = max_iterations(&ledger, 60);
        let done_at = text.find("Completed:").unwrap();
        let open_at = text.find("Remaining:").unwrap();
        assert!(done_at < open_at);
        assert!(text[open_at..].contains("[ ] Build"));
    }

    #[test]
    fn short_output_untouched() {
        assert_eq!(truncate_output("hello", 10), "hello");
    }

    #[test]
    fn long_output_keeps_head_and_tail() {
        let text = format!("{}{}", "a".repeat(100), "z".repeat(100));
        let out = truncate_output(&text, 30);
        assert!(out.starts_with(&"a".repeat(20)));
        assert!(out.ends_with(&"z".repeat(10)));
        assert!(out.contains("[... 170 characters truncated ...]"));
    }
}
