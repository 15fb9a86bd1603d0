//! Command validation: blocks shell commands that can wreck a machine.
//!
//! This is a deny-list of patterns that are destructive no matter which
//! project they run in. Everything else still goes through the approval
//! policy, since `run_command` is a high-risk tool.

use regex::Regex;
use std::sync::LazyLock;

/// A command rejected by [`validate_command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Command blocked ({reason}): {command}")]
pub struct BlockedCommand {
    pub command: String,
    pub reason: &'static str,
}

// =============================================================================
// DESTRUCTIVE PATTERNS
// =============================================================================

const PATTERNS: &[(&str, &str)] = &[
    (
        "recursive deletion of root or home",
        r"\brm\s+(?:-{1,2}[\w-]+\s+)*?(?:-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)\s+(?:-{1,2}[\w-]+\s+)*(?:/\*?|~/?\*?|\$\{?HOME\}?/?\*?)(?:[\s;&|]|$)",
    ),
    ("filesystem creation", r"\bmkfs(?:\.\w+)?\b"),
    (
        "raw disk write",
        r"\bdd\b[^;&|]*\bof=/dev/(?:sd|hd|nvme|disk|mmcblk|vd|xvd)",
    ),
    (
        "redirect onto raw disk",
        r">\s*/dev/(?:sd|hd|nvme|disk|mmcblk|vd|xvd)\w*",
    ),
    ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    ("mass process kill", r"\bkill\s+(?:-\w+\s+)*-1\b"),
    ("mass process kill", r"\bkillall5\b"),
    (
        "system shutdown",
        r"(?:^\s*|[;&|(]\s*|\bsudo\s+|\bsystemctl\s+)(?:shutdown|reboot|halt|poweroff)\b",
    ),
    ("system shutdown", r"\binit\s+[06]\b"),
    (
        "recursive permission change on root",
        r"\b(?:chmod|chown)\s+(?:-\S+\s+)*-[a-zA-Z]*R[a-zA-Z]*\s+(?:\S+\s+)?/(?:[\s;&|]|$)",
    ),
    ("drive format", r"(?i)\bformat(?:\.com)?\s+[a-z]:"),
    (
        "recursive drive deletion",
        r"(?i)\b(?:rd|rmdir)\s+/s\s+/q\s+[a-z]:\\?(?:\s|$)",
    ),
];

static BLOCKED: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .filter_map(|(reason, pattern)| Regex::new(pattern).ok().map(|re| (*reason, re)))
        .collect()
});

/// Reject commands matching a destructive pattern.
pub fn validate_command(command: &str) -> Result<(), BlockedCommand> {
    for (reason, re) in BLOCKED.iter() {
        if re.is_match(command) {
            return Err(BlockedCommand {
                command: command.to_string(),
                reason,
            });
        }
    }
    Ok(())
}
