//! Model stream consumption: debounced deltas, tool-call accumulation.
//!
//! Content and reasoning deltas arriving within one debounce window leave
//! as a single event. Tool-call fragments are stitched together by index
//! and parsed once the stream is done.

use std::collections::BTreeMap;
use std::time::Duration;

use holdfast_core::error::ModelError;
use holdfast_core::event::AgentEvent;
use holdfast_core::model::{ChunkStream, StreamChunk};
use holdfast_core::tool::ToolCall;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a single model call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelTurn {
    pub text: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[derive(Debug, Default)]
struct Buffers {
    content: String,
    reasoning: String,
}

impl Buffers {
    fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty()
    }

    fn flush(&mut self, emit: &mut impl FnMut(AgentEvent)) {
        if !self.content.is_empty() {
            emit(AgentEvent::StreamContent {
                text: std::mem::take(&mut self.content),
            });
        }
        if !self.reasoning.is_empty() {
            emit(AgentEvent::StreamReasoning {
                text: std::mem::take(&mut self.reasoning),
            });
        }
    }
}

/// Drain `stream` into a [`ModelTurn`], emitting debounced stream events.
pub async fn collect_turn(
    mut stream: ChunkStream,
    debounce: Duration,
    cancel: &CancellationToken,
    mut emit: impl FnMut(AgentEvent),
) -> Result<ModelTurn, ModelError> {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut partials: BTreeMap<usize, PartialCall> = BTreeMap::new();
    let mut buffers = Buffers::default();
    let mut flush_at: Option<Instant> = None;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            _ = sleep_until(flush_at) => {
                buffers.flush(&mut emit);
                flush_at = None;
                continue;
            }
            chunk = stream.recv() => chunk,
        };

        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                buffers.flush(&mut emit);
                return Err(e);
            }
            None => {
                buffers.flush(&mut emit);
                return Err(ModelError::StreamInterrupted(
                    "stream ended without a done chunk".into(),
                ));
            }
        };

        match chunk {
            StreamChunk::ContentDelta { text: delta } => {
                text.push_str(&delta);
                buffers.content.push_str(&delta);
            }
            StreamChunk::ReasoningDelta { text: delta } => {
                reasoning.push_str(&delta);
                buffers.reasoning.push_str(&delta);
            }
            StreamChunk::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                let partial = partials.entry(index).or_default();
                if id.is_some() {
                    partial.id = id;
                }
                if let Some(name) = name {
                    partial.name.get_or_insert_with(String::new).push_str(&name);
                }
                partial.arguments.push_str(&arguments);
            }
            StreamChunk::Done {
                text: final_text,
                reasoning: final_reasoning,
                tool_calls,
            } => {
                buffers.flush(&mut emit);
                let tool_calls = if tool_calls.is_empty() {
                    assemble_calls(partials)
                } else {
                    tool_calls
                };
                let reasoning = final_reasoning.or(Some(reasoning)).filter(|r| !r.is_empty());
                debug!(
                    text_len = text.len(),
                    tool_calls = tool_calls.len(),
                    "Model stream done"
                );
                return Ok(ModelTurn {
                    text: final_text.unwrap_or(text),
                    reasoning,
                    tool_calls,
                });
            }
        }

        if buffers.is_empty() {
            continue;
        }
        if debounce.is_zero() {
            buffers.flush(&mut emit);
        } else if flush_at.is_none() {
            flush_at = Some(Instant::now() + debounce);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn assemble_calls(partials: BTreeMap<usize, PartialCall>) -> Vec<ToolCall> {
    partials
        .into_iter()
        .filter_map(|(index, partial)| {
            let Some(name) = partial.name.filter(|n| !n.is_empty()) else {
                warn!(index, "Dropping streamed tool call without a name");
                return None;
            };
            let arguments = if partial.arguments.trim().is_empty() {
                serde_json::Value::Object(Default::default())
            } else {
                serde_json::from_str(&partial.arguments).unwrap_or_else(|e| {
                    warn!(tool = %name, error = %e, "Tool call arguments are not valid JSON");
                    serde_json::Value::String(partial.arguments.clone())
                })
            };
            Some(ToolCall {
                id: partial.id.unwrap_or_else(|| format!("call_{index}")),
                name,
                arguments,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn content(text: &str) -> Result<StreamChunk, ModelError> {
        Ok(StreamChunk::ContentDelta { text: text.into() })
    }

    fn done() -> Result<StreamChunk, ModelError> {
        Ok(StreamChunk::Done {
            text: None,
            reasoning: None,
            tool_calls: vec![],
        })
    }

    #[tokio::test(start_paused = true)]
    async fn deltas_within_window_coalesce() {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            tx.send(content("Hel")).await.unwrap();
            tx.send(content("lo")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(250)).await;
            tx.send(content(" world")).await.unwrap();
            tx.send(done()).await.unwrap();
        });

        let mut events = Vec::new();
        let turn = collect_turn(
            rx,
            Duration::from_millis(100),
            &CancellationToken::new(),
            |e| events.push(e),
        )
        .await
        .unwrap();

        assert_eq!(turn.text, "Hello world");
        let texts: Vec<_> = events
            .iter()
            .map(|e| match e {
                AgentEvent::StreamContent { text } => text.clone(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["Hello", " world"]);
    }

    #[tokio::test]
    async fn tool_call_fragments_accumulate_by_index() {
        let (tx, rx) = mpsc::channel(16);
        for chunk in [
            StreamChunk::ToolCallDelta {
                index: 1,
                id: Some("b".into()),
                name: Some("grep_search".into()),
                arguments: r#"{"pattern":"#.into(),
            },
            StreamChunk::ToolCallDelta {
                index: 0,
                id: Some("a".into()),
                name: Some("read_file".into()),
                arguments: r#"{"path":"src/"#.into(),
            },
            StreamChunk::ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: r#"lib.rs"}"#.into(),
            },
            StreamChunk::ToolCallDelta {
                index: 1,
                id: None,
                name: None,
                arguments: r#""fn main"}"#.into(),
            },
        ] {
            tx.send(Ok(chunk)).await.unwrap();
        }
        tx.send(done()).await.unwrap();

        let turn = collect_turn(rx, Duration::ZERO, &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(
            turn.tool_calls,
            vec![
                ToolCall::new("a", "read_file", json!({"path": "src/lib.rs"})),
                ToolCall::new("b", "grep_search", json!({"pattern": "fn main"})),
            ]
        );
    }

    #[tokio::test]
    async fn done_payload_wins_over_fragments() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(content("draft")).await.unwrap();
        tx.send(Ok(StreamChunk::Done {
            text: Some("final".into()),
            reasoning: Some("because".into()),
            tool_calls: vec![ToolCall::new("x", "todo_write", json!({"todos": []}))],
        }))
        .await
        .unwrap();

        let turn = collect_turn(rx, Duration::ZERO, &CancellationToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(turn.text, "final");
        assert_eq!(turn.reasoning.as_deref(), Some("because"));
        assert_eq!(turn.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn stream_error_is_returned() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Err(ModelError::Network("reset".into()))).await.unwrap();
        let err = collect_turn(rx, Duration::ZERO, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Network(_)));
    }

    #[tokio::test]
    async fn closed_stream_without_done_is_interrupted() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(content("partial")).await.unwrap();
        drop(tx);
        let err = collect_turn(rx, Duration::ZERO, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::StreamInterrupted(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_collection() {
        let (_tx, rx) = mpsc::channel::<Result<StreamChunk, ModelError>>(4);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = collect_turn(rx, Duration::ZERO, &cancel, |_| {}).await.unwrap_err();
        assert!(matches!(err, ModelError::Cancelled));
    }
}
