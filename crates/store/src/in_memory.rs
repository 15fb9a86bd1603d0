//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use holdfast_core::error::StoreError;
use holdfast_core::store::{ExecutionHistory, HistoryStore, TodoStore};
use holdfast_core::todo::TodoItem;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps todo snapshots and histories in maps keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    todos: Arc<RwLock<HashMap<String, Vec<TodoItem>>>>,
    history: Arc<RwLock<HashMap<String, ExecutionHistory>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TodoStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load_todos(&self, session_id: &str) -> Result<Option<Vec<TodoItem>>, StoreError> {
        Ok(self.todos.read().await.get(session_id).cloned())
    }

    async fn save_todos(&self, session_id: &str, items: &[TodoItem]) -> Result<(), StoreError> {
        self.todos
            .write()
            .await
            .insert(session_id.to_string(), items.to_vec());
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load_history(&self, session_id: &str) -> Result<Option<ExecutionHistory>, StoreError> {
        Ok(self.history.read().await.get(session_id).cloned())
    }

    async fn save_history(&self, history: &ExecutionHistory) -> Result<(), StoreError> {
        self.history
            .write()
            .await
            .insert(history.session_id.clone(), history.clone());
        Ok(())
    }
}
