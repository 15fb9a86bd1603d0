//! Path validation: filesystem sandboxing to the project root.
//!
//! Every path-based tool calls [`validate_path`] before it touches the
//! filesystem. The check is lexical first, so an obvious escape such as
//! `../../etc/passwd` is rejected without a single syscall.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' resolves outside the project root")]
    OutsideProjectRoot { path: String },

    #[error("Path '{path}' escapes the project root through a symlink")]
    SymlinkEscape { path: String },

    #[error("Path is empty")]
    Empty,
}

/// Resolve `path` against `project_root` and ensure it stays inside it.
///
/// Relative paths are joined onto the root; `.` and `..` are folded
/// lexically. The result must be the root itself or a descendant. When the
/// nearest existing ancestor of the result can be canonicalized, it must
/// also canonicalize to somewhere under the canonical root, which catches
/// symlinks pointing out of the project.
///
/// Returns the normalized absolute path on success.
pub fn validate_path(path: &str, project_root: &Path) -> Result<PathBuf, PathValidationError> {
    if path.trim().is_empty() {
        return Err(PathValidationError::Empty);
    }

    let root = normalize(project_root);
    let candidate = Path::new(path);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let resolved = normalize(&joined);

    if !resolved.starts_with(&root) {
        return Err(PathValidationError::OutsideProjectRoot { path: path.into() });
    }

    // Symlink check. Only meaningful when the root itself exists.
    if let Ok(canonical_root) = root.canonicalize()
        && let Some(canonical) = canonicalize_existing_prefix(&resolved)
        && !canonical.starts_with(&canonical_root)
    {
        return Err(PathValidationError::SymlinkEscape { path: path.into() });
    }

    Ok(resolved)
}

/// Express `path` relative to the root, for messages shown to the model.
pub fn display_relative(path: &Path, project_root: &Path) -> String {
    let root = normalize(project_root);
    path.strip_prefix(&root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_else(|_| path.to_string_lossy().into_owned())
}

/// Lexically fold `.` and `..` components. `..` at the filesystem root is
/// dropped, matching how the OS resolves it.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Canonicalize the deepest ancestor of `path` that exists, then re-append
/// the non-existent tail.
fn canonicalize_existing_prefix(path: &Path) -> Option<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut result = canonical;
            for part in tail.iter().rev() {
                result.push(part);
            }
            return Some(result);
        }
        let name = existing.file_name()?.to_os_string();
        tail.push(name);
        if !existing.pop() {
            return None;
        }
    }
}
