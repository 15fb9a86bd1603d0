//! Model streaming contract: the abstraction over language-model backends.
//!
//! The loop only ever talks to a model through [`ModelClient::stream_chat`].
//! Wire formats, authentication and account failover live behind this trait
//! in the host.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ModelError;
use crate::message::Message;
use crate::tool::{ToolCall, ToolDefinition};

/// Whether the model may, must, or must not call tools this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
}

/// One model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The model to use
    pub model: String,

    /// The full conversation
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default)]
    pub tool_choice: ToolChoice,
}

/// A single event in a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Partial answer text
    ContentDelta { text: String },

    /// Partial reasoning ("thinking") text
    ReasoningDelta { text: String },

    /// Fragment of a tool call. Fragments sharing an `index` belong to the
    /// same call; `id` and `name` usually arrive only on the first one.
    ToolCallDelta {
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },

    /// End of the response. Fields left empty are reconstructed from the
    /// accumulated deltas.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
}

/// Receiving half of a model stream.
pub type ChunkStream = mpsc::Receiver<Result<StreamChunk, ModelError>>;

/// The model streaming contract.
///
/// Implementations must stop producing chunks promptly once `cancel` fires.
/// An `Err` item on the stream is terminal for the call.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this backend.
    fn name(&self) -> &str;

    /// Start a streaming chat completion.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ModelError>;
}
