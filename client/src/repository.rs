//! Todo repository: the CRUD boundary against the remote collection.
//!
//! Every operation takes the acting [`Identity`] explicitly. Nothing here
//! reads ambient "current user" state, so ownership scoping can be tested in
//! isolation by handing in different identities.
//!
//! The repository never patches anything locally. Callers re-fetch with
//! [`TodoRepository::list`] after each successful mutation and treat the
//! store's answer as authoritative.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::error::{AuthError, Result, StoreError};
use crate::types::{Identity, NewTodo, Todo, TodoInsert, TodoPatch};

/// The relational store collaborator, seen as a single `todos` collection.
///
/// Implementations are responsible for row-level ownership: an identity may
/// only see and mutate its own rows.
#[async_trait]
pub trait TodoStore: Send + Sync {
    /// Returns every row visible to `identity`, newest first.
    async fn select_all(&self, identity: &Identity) -> std::result::Result<Vec<Todo>, StoreError>;

    /// Inserts one row and returns it as stored.
    async fn insert(
        &self,
        identity: &Identity,
        row: TodoInsert,
    ) -> std::result::Result<Todo, StoreError>;

    /// Applies a partial update to the row with `id`.
    ///
    /// Fails with [`StoreError::NotFound`] if no such row is visible.
    async fn update(
        &self,
        identity: &Identity,
        id: &str,
        patch: TodoPatch,
    ) -> std::result::Result<(), StoreError>;

    /// Removes the row with `id`. Removing a missing row is not an error.
    async fn delete(&self, identity: &Identity, id: &str) -> std::result::Result<(), StoreError>;
}

/// CRUD operations on a user's todos.
#[derive(Clone)]
pub struct TodoRepository {
    store: Arc<dyn TodoStore>,
}

impl TodoRepository {
    /// Creates a repository over the given store.
    pub fn new(store: Arc<dyn TodoStore>) -> Self {
        Self { store }
    }

    /// Lists the identity's todos, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on transport or permission failure.
    pub async fn list(&self, identity: &Identity) -> Result<Vec<Todo>> {
        let todos = self.store.select_all(identity).await?;
        debug!(user_id = %identity.id, count = todos.len(), "Listed todos");
        Ok(todos)
    }

    /// Creates a todo owned by `identity`.
    ///
    /// The title is not re-validated here; the editor does that before
    /// calling.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] if the identity has no id
    /// - [`StoreError`] if the insert fails
    pub async fn create(&self, identity: &Identity, new: NewTodo) -> Result<Todo> {
        if identity.id.is_empty() {
            return Err(AuthError::NotAuthenticated.into());
        }

        let row = TodoInsert {
            user_id: identity.id.clone(),
            title: new.title,
            content: new.content,
            image_url: new.image_url,
        };

        let todo = self.store.insert(identity, row).await?;
        info!(todo_id = %todo.id, user_id = %identity.id, "Todo created");
        Ok(todo)
    }

    /// Replaces the title, content and attachment of an existing todo and
    /// stamps `updated_at`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the todo no longer exists
    /// - [`StoreError::PermissionDenied`] if it belongs to someone else
    pub async fn update(
        &self,
        identity: &Identity,
        id: &str,
        title: impl Into<String>,
        content: impl Into<String>,
        image_url: Option<String>,
    ) -> Result<()> {
        let patch = TodoPatch {
            title: Some(title.into()),
            content: Some(content.into()),
            image_url: Some(image_url),
            completed: None,
            updated_at: Some(Utc::now()),
        };

        self.store.update(identity, id, patch).await?;
        info!(todo_id = %id, "Todo updated");
        Ok(())
    }

    /// Flips the completion flag relative to the given snapshot.
    ///
    /// No other field changes, including `updated_at`.
    pub async fn toggle_completed(&self, identity: &Identity, todo: &Todo) -> Result<()> {
        let patch = TodoPatch {
            completed: Some(!todo.completed),
            ..TodoPatch::default()
        };

        self.store.update(identity, &todo.id, patch).await?;
        info!(todo_id = %todo.id, completed = !todo.completed, "Todo toggled");
        Ok(())
    }

    /// Deletes a todo. Deleting one that is already gone succeeds.
    pub async fn delete(&self, identity: &Identity, todo: &Todo) -> Result<()> {
        self.store.delete(identity, &todo.id).await?;
        info!(todo_id = %todo.id, "Todo deleted");
        Ok(())
    }
}
