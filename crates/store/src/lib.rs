//! Persistence for Holdfast: todo snapshots and execution history.
//!
//! Backends:
//! - **InMemory**: maps behind a lock, for tests and ephemeral sessions
//! - **File**: JSON documents under a state directory (default)

pub mod file_backend;
pub mod in_memory;

use std::sync::Arc;

use holdfast_config::{StoreBackend, StoreSettings};
use holdfast_core::store::{HistoryStore, TodoStore};
use tracing::info;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;

/// Both store handles, backed by the same backend.
#[derive(Clone)]
pub struct Stores {
    pub todos: Arc<dyn TodoStore>,
    pub history: Arc<dyn HistoryStore>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("todos", &self.todos.name())
            .field("history", &self.history.name())
            .finish()
    }
}

/// Open the backend selected in the configuration.
pub fn open(settings: &StoreSettings) -> Stores {
    match settings.backend {
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryStore::new());
            info!(backend = "memory", "Store opened");
            Stores {
                todos: store.clone(),
                history: store,
            }
        }
        StoreBackend::File => {
            let dir = settings.resolved_dir();
            info!(backend = "file", dir = %dir.display(), "Store opened");
            let store = Arc::new(FileStore::new(dir));
            Stores {
                todos: store.clone(),
                history: store,
            }
        }
    }
}
