//! File-based store: one JSON document per session and record kind.
//!
//! Layout under the store directory:
//!
//! ```text
//! todos/<session>.json     Vec<TodoItem>
//! history/<session>.json   ExecutionHistory
//! ```
//!
//! Writes go to a temporary sibling and are renamed into place, so a crash
//! never leaves a half-written document behind.

use async_trait::async_trait;
use holdfast_core::error::StoreError;
use holdfast_core::store::{ExecutionHistory, HistoryStore, TodoStore};
use holdfast_core::todo::TodoItem;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const TODOS_DIR: &str = "todos";
const HISTORY_DIR: &str = "history";

/// A file-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        debug!(root = %root.display(), "File store opened");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, kind: &str, session_id: &str) -> PathBuf {
        self.root
            .join(kind)
            .join(format!("{}.json", file_stem(session_id)))
    }

    async fn read<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&content).map(Some).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Corrupted store document");
            StoreError::Corrupted {
                key: path.display().to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn write<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Storage(format!("Failed to create store directory: {e}"))
            })?;
        }
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::Storage(format!("Failed to serialize record: {e}")))?;

        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write store file: {e}")))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StoreError::Storage(format!(
                "Failed to move store file into place: {e}"
            )));
        }
        Ok(())
    }
}

/// Session ids come from hosts; keep only filename-safe characters.
fn file_stem(session_id: &str) -> String {
    let stem: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() { "_".into() } else { stem }
}

#[async_trait]
impl TodoStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load_todos(&self, session_id: &str) -> Result<Option<Vec<TodoItem>>, StoreError> {
        self.read(&self.document_path(TODOS_DIR, session_id)).await
    }

    async fn save_todos(&self, session_id: &str, items: &[TodoItem]) -> Result<(), StoreError> {
        let path = self.document_path(TODOS_DIR, session_id);
        self.write(&path, items).await?;
        debug!(session = %session_id, count = items.len(), "Todos saved");
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load_history(&self, session_id: &str) -> Result<Option<ExecutionHistory>, StoreError> {
        self.read(&self.document_path(HISTORY_DIR, session_id)).await
    }

    async fn save_history(&self, history: &ExecutionHistory) -> Result<(), StoreError> {
        let path = self.document_path(HISTORY_DIR, &history.session_id);
        self.write(&path, history).await?;
        debug!(session = %history.session_id, "History saved");
        Ok(())
    }
}
