//! Context management: token estimation and conversation compression.

pub mod compressor;
pub mod token;

pub use compressor::{Compression, ContextCompressor};
pub use token::{
    estimate_message_tokens, estimate_messages_tokens, estimate_tokens, estimate_tool_tokens,
    estimate_tools_tokens,
};
