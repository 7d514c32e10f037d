//! In-memory snapshot of the user's todo collection.
//!
//! The cache is only ever replaced wholesale by a successful
//! [`TodoRepository::list`]. A failed refresh keeps the previous snapshot so
//! the user keeps seeing their list, possibly stale, instead of an empty one.

use tracing::{debug, warn};

use crate::error::Result;
use crate::repository::TodoRepository;
use crate::types::{Identity, Todo};

/// Process-local reflection of the remote collection.
#[derive(Debug, Default)]
pub struct TodoCache {
    todos: Vec<Todo>,
    loaded: bool,
}

impl TodoCache {
    /// Creates an empty, not-yet-loaded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot, newest first.
    pub fn snapshot(&self) -> &[Todo] {
        &self.todos
    }

    pub fn len(&self) -> usize {
        self.todos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.todos.is_empty()
    }

    /// Returns true once at least one refresh has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Linear lookup by id.
    pub fn find(&self, id: &str) -> Option<&Todo> {
        self.todos.iter().find(|t| t.id == id)
    }

    /// Re-fetches the whole collection.
    ///
    /// # Errors
    ///
    /// Propagates the repository error. The previous snapshot is retained.
    pub async fn refresh(&mut self, repo: &TodoRepository, identity: &Identity) -> Result<&[Todo]> {
        match repo.list(identity).await {
            Ok(todos) => {
                debug!(count = todos.len(), "Todo cache refreshed");
                self.todos = todos;
                self.loaded = true;
                Ok(&self.todos)
            }
            Err(e) => {
                warn!(error = %e, retained = self.todos.len(), "Todo cache refresh failed");
                Err(e)
            }
        }
    }

    /// Drops the snapshot, e.g. when the identity changes.
    pub fn clear(&mut self) {
        self.todos.clear();
        self.loaded = false;
    }
}
