//! Error types for the Holdfast domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all Holdfast operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the model streaming call. These abort the current iteration
/// and end the session as `Failed`.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Malformed stream payload: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model call cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted record for '{key}': {reason}")]
    Corrupted { key: String, reason: String },
}

/// Stable, wire-visible codes for tool failures.
///
/// These strings are what the model sees in a failed tool result, so they
/// must not change between releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    ToolNotFound,
    InvalidParams,
    ToolTimeout,
    ToolCrash,
    PathTraversal,
    CmdBlocked,
    ApprovalDenied,
    MultipleMatches,
    MatchNotFound,
    VerificationFailed,
    ExecutionFailed,
    Cancelled,
}

impl ToolErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::ToolTimeout => "TOOL_TIMEOUT",
            Self::ToolCrash => "TOOL_CRASH",
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::CmdBlocked => "CMD_BLOCKED",
            Self::ApprovalDenied => "APPROVAL_DENIED",
            Self::MultipleMatches => "MULTIPLE_MATCHES",
            Self::MatchNotFound => "MATCH_NOT_FOUND",
            Self::VerificationFailed => "VERIFICATION_FAILED",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ToolErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool crashed: {tool_name}: {reason}")]
    Crashed { tool_name: String, reason: String },

    #[error("Path '{path}' resolves outside the project root")]
    PathTraversal { path: String },

    #[error("Command blocked: {reason}")]
    CommandBlocked { command: String, reason: String },

    #[error("Approval denied for {tool_name}: {reason}")]
    ApprovalDenied { tool_name: String, reason: String },

    #[error(
        "old_string matched {count} locations; add surrounding context to make it unique or set replace_all"
    )]
    MultipleMatches { count: usize },

    #[error(
        "old_string not found in {path}; re-read the file and retry with the exact current text"
    )]
    MatchNotFound { path: String },

    #[error("Write verification failed for {path}: file content differs from the expected result")]
    VerificationFailed { path: String },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool execution cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn code(&self) -> ToolErrorCode {
        match self {
            Self::NotFound(_) => ToolErrorCode::ToolNotFound,
            Self::InvalidArguments(_) => ToolErrorCode::InvalidParams,
            Self::Timeout { .. } => ToolErrorCode::ToolTimeout,
            Self::Crashed { .. } => ToolErrorCode::ToolCrash,
            Self::PathTraversal { .. } => ToolErrorCode::PathTraversal,
            Self::CommandBlocked { .. } => ToolErrorCode::CmdBlocked,
            Self::ApprovalDenied { .. } => ToolErrorCode::ApprovalDenied,
            Self::MultipleMatches { .. } => ToolErrorCode::MultipleMatches,
            Self::MatchNotFound { .. } => ToolErrorCode::MatchNotFound,
            Self::VerificationFailed { .. } => ToolErrorCode::VerificationFailed,
            Self::ExecutionFailed { .. } => ToolErrorCode::ExecutionFailed,
            Self::Cancelled => ToolErrorCode::Cancelled,
        }
    }

    /// Whether the model can reasonably recover by trying something else.
    pub fn recoverable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_displays_correctly() {
        let err = Error::Model(ModelError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_codes_are_stable() {
        assert_eq!(
            ToolError::MultipleMatches { count: 2 }.code().as_str(),
            "MULTIPLE_MATCHES"
        );
        assert_eq!(
            ToolError::PathTraversal { path: "../x".into() }.code(),
            ToolErrorCode::PathTraversal
        );
        let json = serde_json::to_string(&ToolErrorCode::CmdBlocked).unwrap();
        assert_eq!(json, r#""CMD_BLOCKED""#);
    }

    #[test]
    fn only_cancellation_is_unrecoverable() {
        assert!(!ToolError::Cancelled.recoverable());
        assert!(
            ToolError::ApprovalDenied {
                tool_name: "run_command".into(),
                reason: "user declined".into(),
            }
            .recoverable()
        );
    }
}
