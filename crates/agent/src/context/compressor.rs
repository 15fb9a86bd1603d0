//! Context compressor: folds older conversation turns into one summary.
//!
//! The conversation is split into four parts: the original system message,
//! the first user message, critical system messages (workflow instructions,
//! session memory, earlier summaries) and the middle. Only the middle is
//! compressed. Its oldest part becomes a single critical summary carrying
//! files touched, key decisions and the full todo checklist.

use std::collections::BTreeSet;

use holdfast_core::message::{Message, Role};
use holdfast_core::todo::TodoLedger;
use tracing::{debug, info};

use super::token::estimate_messages_tokens;

/// Middle regions shorter than this are left alone.
const MIN_MIDDLE: usize = 6;
/// Upper bound on middle messages kept verbatim.
const MAX_KEEP: usize = 15;
const MAX_DECISIONS: usize = 5;
const DECISION_CHARS: usize = 300;

/// Tool names whose `path` argument counts as a touched file.
const FILE_TOOLS: &[&str] = &[
    "write_file",
    "edit_file",
    "str_replace",
    "create_file",
    "delete_file",
];

/// Result of a successful compression.
#[derive(Debug, Clone)]
pub struct Compression {
    pub messages: Vec<Message>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// Middle messages folded into the summary
    pub summarized: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ContextCompressor;

impl ContextCompressor {
    pub fn new() -> Self {
        Self
    }

    /// Compress `messages`, or `None` when there is nothing worth doing or
    /// the result would not be cheaper.
    pub fn compress(&self, messages: &[Message], todos: &TodoLedger) -> Option<Compression> {
        let system_idx = messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|_| 0);
        let user_idx = messages.iter().position(|m| m.role == Role::User);

        let mut critical = Vec::new();
        let mut middle = Vec::new();
        for (i, msg) in messages.iter().enumerate() {
            if Some(i) == system_idx || Some(i) == user_idx {
                continue;
            }
            if msg.critical {
                critical.push(msg);
            } else {
                middle.push(msg);
            }
        }

        if middle.len() < MIN_MIDDLE {
            debug!(middle = middle.len(), "Compression skipped: middle too short");
            return None;
        }

        let keep = (middle.len() * 2 / 5).clamp(MIN_MIDDLE, MAX_KEEP);
        let mut split = middle.len().saturating_sub(keep);
        // Tool results stay with the assistant call that produced them.
        while split > 0 && middle[split].role == Role::Tool {
            split -= 1;
        }
        if split == 0 {
            return None;
        }

        let (folded, kept) = middle.split_at(split);
        let summary = Message::critical_system(summarize(folded, todos));

        let mut out = Vec::with_capacity(3 + critical.len() + kept.len());
        if let Some(i) = system_idx {
            out.push(messages[i].clone());
        }
        if let Some(i) = user_idx {
            out.push(messages[i].clone());
        }
        out.extend(critical.into_iter().cloned());
        out.push(summary);
        out.extend(kept.iter().map(|m| (*m).clone()));

        let tokens_before = estimate_messages_tokens(messages);
        let tokens_after = estimate_messages_tokens(&out);
        if tokens_after >= tokens_before {
            debug!(tokens_before, tokens_after, "Compression skipped: no saving");
            return None;
        }

        info!(
            messages_before = messages.len(),
            messages_after = out.len(),
            tokens_before,
            tokens_after,
            "Context compressed"
        );
        Some(Compression {
            messages: out,
            tokens_before,
            tokens_after,
            summarized: folded.len(),
        })
    }
}

fn summarize(folded: &[&Message], todos: &TodoLedger) -> String {
    let mut files = BTreeSet::new();
    for msg in folded {
        for call in &msg.tool_calls {
            if FILE_TOOLS.contains(&call.name.as_str())
                && let Some(path) = call.str_arg("path")
            {
                files.insert(path.to_string());
            }
        }
    }

    // Longest assistant texts, reported in conversation order.
    let mut ranked: Vec<(usize, &str)> = folded
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Assistant && !m.text().trim().is_empty())
        .map(|(i, m)| (i, m.text().trim()))
        .collect();
    ranked.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(a.0.cmp(&b.0)));
    ranked.truncate(MAX_DECISIONS);
    ranked.sort_by_key(|(i, _)| *i);

    let mut out = format!(
        "## Summary of {} earlier messages\n\nOlder conversation was compressed. Facts carried over:\n",
        folded.len()
    );

    out.push_str("\nFiles touched:\n");
    if files.is_empty() {
        out.push_str("- (none)\n");
    }
    for file in &files {
        out.push_str(&format!("- {file}\n"));
    }

    if !ranked.is_empty() {
        out.push_str("\nKey decisions:\n");
        for (_, text) in &ranked {
            out.push_str(&format!("- {}\n", clip(text, DECISION_CHARS)));
        }
    }

    out.push_str("\nTodo list (current):\n");
    let checklist = todos.render_checklist();
    if checklist.is_empty() {
        out.push_str("(empty)\n");
    } else {
        out.push_str(&checklist);
        out.push('\n');
    }
    out
}

fn clip(text: &str, max_chars: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let mut clipped: String = single_line.chars().take(max_chars).collect();
    clipped.push('…');
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use holdfast_core::{TodoItem, TodoStatus, ToolCall};
    use serde_json::json;

    fn edit_turn(n: usize) -> Vec<Message> {
        let call = ToolCall::new(
            format!("call_{n}"),
            "edit_file",
            json!({"path": format!("src/file_{n}.rs"), "old_string": "a", "new_string": "b"}),
        );
        vec![
            Message::assistant_tool_calls(
                Some(format!("Step {n}: updating file {n} because {}", "x".repeat(200))),
                vec![call],
                None,
            ),
            Message::tool_result(format!("call_{n}"), "y".repeat(400)),
        ]
    }

    fn long_conversation(turns: usize) -> Vec<Message> {
        let mut msgs = vec![
            Message::system("You are a coding agent."),
            Message::user("Refactor the crate."),
            Message::critical_system("Workflow: 1. plan 2. edit 3. test"),
        ];
        for n in 0..turns {
            msgs.extend(edit_turn(n));
        }
        msgs
    }

    fn ledger() -> TodoLedger {
        let ledger = TodoLedger::new();
        ledger.restore(vec![
            TodoItem::new("1", "Plan", TodoStatus::Completed),
            TodoItem::new("2", "Edit every module", TodoStatus::InProgress),
            TodoItem::new("3", "Run tests", TodoStatus::Pending),
        ]);
        ledger
    }

    #[test]
    fn short_middle_is_skipped() {
        let msgs = long_conversation(2);
        assert!(ContextCompressor::new().compress(&msgs, &ledger()).is_none());
    }

    #[test]
    fn compression_lowers_cost_and_keeps_critical_messages() {
        let msgs = long_conversation(20);
        let result = ContextCompressor::new().compress(&msgs, &ledger()).unwrap();

        assert!(result.tokens_after < result.tokens_before);
        assert_eq!(estimate_messages_tokens(&result.messages), result.tokens_after);

        for original in msgs.iter().filter(|m| m.critical) {
            assert!(result.messages.iter().any(|m| m == original));
        }
        assert_eq!(result.messages[0], msgs[0]);
        assert_eq!(result.messages[1], msgs[1]);
    }

    #[test]
    fn kept_window_follows_forty_percent_rule() {
        // 40 middle messages: 40% = 16, capped at 15, moved back to an
        // assistant boundary.
        let msgs = long_conversation(20);
        let result = ContextCompressor::new().compress(&msgs, &ledger()).unwrap();
        let kept = result.messages.len() - 4;
        assert_eq!(kept, 16);
        assert_eq!(result.summarized, 24);
    }

    #[test]
    fn tool_results_never_lead_the_kept_window() {
        let msgs = long_conversation(10);
        let result = ContextCompressor::new().compress(&msgs, &ledger()).unwrap();
        let summary_pos = result
            .messages
            .iter()
            .position(|m| m.text().starts_with("## Summary"))
            .unwrap();
        assert_ne!(result.messages[summary_pos + 1].role, Role::Tool);
    }

    #[test]
    fn summary_carries_files_and_full_todo_snapshot() {
        let msgs = long_conversation(20);
        let result = ContextCompressor::new().compress(&msgs, &ledger()).unwrap();
        let summary = result
            .messages
            .iter()
            .find(|m| m.text().starts_with("## Summary"))
            .unwrap();

        assert!(summary.critical);
        let text = summary.text();
        assert!(text.contains("src/file_0.rs"));
        assert!(text.contains("[x] Plan"));
        assert!(text.contains("[~] Edit every module"));
        assert!(text.contains("[ ] Run tests"));
        assert!(text.matches("\n- Step").count() <= MAX_DECISIONS);
    }

    #[test]
    fn earlier_summaries_survive_recompression() {
        let compressor = ContextCompressor::new();
        let first = compressor.compress(&long_conversation(20), &ledger()).unwrap();

        let mut grown = first.messages.clone();
        for n in 100..120 {
            grown.extend(edit_turn(n));
        }
        let second = compressor.compress(&grown, &ledger()).unwrap();

        for original in grown.iter().filter(|m| m.critical) {
            assert!(second.messages.iter().any(|m| m == original));
        }
        assert_eq!(
            second
                .messages
                .iter()
                .filter(|m| m.text().starts_with("## Summary"))
                .count(),
            2
        );
    }
}
