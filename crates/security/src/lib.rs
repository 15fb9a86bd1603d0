//! Security layer for Holdfast: path sandboxing, destructive-command
//! blocking, approval policy, and audit logging.
//!
//! Provides:
//! - **Path validation**: every file path stays inside the project root
//! - **Command validation**: a deny-list of machine-wrecking shell commands
//! - **Approval policy**: which risk levels need a human decision
//! - **Audit logging**: structured security event logging

pub mod approval;
pub mod audit;
pub mod command;
pub mod path;

use holdfast_core::ToolError;

pub use approval::needs_approval;
pub use audit::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome, AuditSink, TracingSink};
pub use command::{validate_command, BlockedCommand};
pub use path::{display_relative, validate_path, PathValidationError};

/// A security check that refused a tool call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SecurityError {
    #[error(transparent)]
    Path(#[from] PathValidationError),

    #[error(transparent)]
    Command(#[from] BlockedCommand),
}

impl From<SecurityError> for ToolError {
    fn from(e: SecurityError) -> Self {
        match e {
            SecurityError::Path(PathValidationError::Empty) => {
                ToolError::InvalidArguments("path must not be empty".into())
            }
            SecurityError::Path(
                PathValidationError::OutsideProjectRoot { path }
                | PathValidationError::SymlinkEscape { path },
            ) => ToolError::PathTraversal { path },
            SecurityError::Command(blocked) => ToolError::CommandBlocked {
                command: blocked.command,
                reason: blocked.reason.to_string(),
            },
        }
    }
}

impl From<PathValidationError> for ToolError {
    fn from(e: PathValidationError) -> Self {
        SecurityError::from(e).into()
    }
}

impl From<BlockedCommand> for ToolError {
    fn from(e: BlockedCommand) -> Self {
        SecurityError::from(e).into()
    }
}
