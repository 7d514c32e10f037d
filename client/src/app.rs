//! Non-visual controller for a single signed-in session.
//!
//! [`TodoBook`] owns the collection cache and the editor, and turns the
//! outcome of every user intent into a [`Notice`]. A shell renders
//! [`TodoBook::todos`], [`TodoBook::editor`] and the drained notices, and
//! forwards intents back into the controller.
//!
//! Every successful mutation is followed by a full refresh. A refresh failure
//! at that point gets its own notice; the mutation is still reported as a
//! success.
//!
//! The controller subscribes to the [`SessionManager`] when it is built.
//! Identity changes pushed by the provider are applied before every intent,
//! or as they arrive through [`TodoBook::follow_session`]. Until then
//! [`TodoBook::todos`] hides a snapshot that belongs to another identity.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::attachment::AttachmentUploader;
use crate::cache::TodoCache;
use crate::editor::{Editor, SaveOutcome};
use crate::error::{AuthError, Result, StoreError, TodoBookError};
use crate::repository::TodoRepository;
use crate::session::{SessionManager, SessionState};
use crate::types::{Identity, Todo};

/// Severity of a [`Notice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// A transient notification for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: Option<String>,
}

impl Notice {
    pub fn success(title: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            title: title.into(),
            description: None,
        }
    }

    pub fn error(title: impl Into<String>, description: Option<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            title: title.into(),
            description,
        }
    }

    /// Error notice carrying the error's user-facing message.
    pub fn from_error(title: impl Into<String>, err: &TodoBookError) -> Self {
        Self::error(title, Some(err.user_message()))
    }

    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.title),
            None => write!(f, "{}", self.title),
        }
    }
}

/// Composes the session, repository, cache and editor.
pub struct TodoBook {
    session: Arc<SessionManager>,
    repo: TodoRepository,
    uploader: AttachmentUploader,
    cache: TodoCache,
    editor: Editor,
    notices: Vec<Notice>,
    /// Last session state the data was loaded for.
    seen: SessionState,
    changes: watch::Receiver<SessionState>,
}

impl TodoBook {
    pub fn new(
        session: Arc<SessionManager>,
        repo: TodoRepository,
        uploader: AttachmentUploader,
    ) -> Self {
        let changes = session.subscribe();
        Self {
            session,
            repo,
            uploader,
            cache: TodoCache::new(),
            editor: Editor::new(),
            notices: Vec::new(),
            seen: SessionState::Unresolved,
            changes,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// The cached collection, newest first.
    ///
    /// Empty while the session names a different identity than the one the
    /// snapshot was loaded for.
    pub fn todos(&self) -> &[Todo] {
        if self.is_stale() {
            return &[];
        }
        self.cache.snapshot()
    }

    pub fn cache(&self) -> &TodoCache {
        &self.cache
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    /// Mutable access for form edits (title, content, attachment).
    pub fn editor_mut(&mut self) -> &mut Editor {
        &mut self.editor
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Takes all pending notices.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Resolves the session and, when signed in, loads the collection once.
    pub async fn mount(&mut self) -> SessionState {
        let state = match self.session.resolve().await {
            Ok(state) => state,
            Err(e) => {
                self.notices.push(Notice::from_error("Error loading session", &e));
                self.session.state()
            }
        };

        self.changes.mark_unchanged();
        self.seen = state.clone();
        if state.identity().is_some() {
            self.reload().await;
        }
        state
    }

    /// Applies a pending identity change, if any, then re-fetches the
    /// collection for the current identity.
    ///
    /// Returns `true` if the collection was loaded. On failure the previous
    /// snapshot is kept and an "Error fetching todos" notice is pushed.
    pub async fn refresh(&mut self) -> bool {
        self.sync_session().await;
        self.reload().await
    }

    async fn reload(&mut self) -> bool {
        let result = match self.session.current_identity() {
            Some(identity) => self.cache.refresh(&self.repo, &identity).await.map(|_| ()),
            None => Err(AuthError::NotAuthenticated.into()),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                self.notices.push(Notice::from_error("Error fetching todos", &e));
                false
            }
        }
    }

    /// Applies the latest session state if it changed since it was last seen.
    pub async fn sync_session(&mut self) {
        if !self.changes.has_changed().unwrap_or(false) {
            return;
        }
        let state = self.changes.borrow_and_update().clone();
        self.on_session_change(state).await;
    }

    /// Waits for the next identity change and applies it.
    ///
    /// Returns `false` once the session manager has gone away.
    pub async fn follow_session(&mut self) -> bool {
        if self.changes.changed().await.is_err() {
            return false;
        }
        let state = self.changes.borrow_and_update().clone();
        self.on_session_change(state).await;
        true
    }

    pub fn new_todo(&mut self) {
        self.editor.new_todo();
    }

    /// Starts editing the cached todo with `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the id is not in the cache.
    pub fn select(&mut self, id: &str) -> Result<()> {
        let todo = self.cached(id)?.clone();
        self.editor.select(todo);
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.editor.cancel();
    }

    /// Saves the editor form, then refreshes the collection.
    ///
    /// # Errors
    ///
    /// Returns the save failure; the editor keeps its state and form.
    pub async fn save(&mut self) -> Result<SaveOutcome> {
        self.sync_session().await;
        let identity = self.session.current_identity();
        match self
            .editor
            .save(identity.as_ref(), &self.repo, &self.uploader)
            .await
        {
            Ok(outcome) => {
                let message = match &outcome {
                    SaveOutcome::Created(_) => "Todo created!",
                    SaveOutcome::Updated(_) => "Todo updated!",
                };
                self.notices.push(Notice::success(message));
                self.reload().await;
                Ok(outcome)
            }
            Err(e) => {
                let notice = if e.is_validation() {
                    Notice::error(e.user_message(), None)
                } else {
                    Notice::from_error("Error saving todo", &e)
                };
                self.notices.push(notice);
                Err(e)
            }
        }
    }

    /// Flips the completed flag of the cached todo with `id`.
    ///
    /// # Errors
    ///
    /// Returns the lookup or store failure, with an "Error updating todo"
    /// notice.
    pub async fn toggle(&mut self, id: &str) -> Result<()> {
        self.sync_session().await;
        let result = self.toggle_inner(id).await;
        match &result {
            Ok(()) => {
                self.reload().await;
            }
            Err(e) => self.notices.push(Notice::from_error("Error updating todo", e)),
        }
        result
    }

    async fn toggle_inner(&self, id: &str) -> Result<()> {
        let identity = self.require_identity()?;
        let todo = self.cached(id)?;
        self.repo.toggle_completed(&identity, todo).await
    }

    /// Deletes the cached todo with `id`.
    ///
    /// If it was open in the editor, the editor returns to idle.
    ///
    /// # Errors
    ///
    /// Returns the lookup or store failure, with an "Error deleting todo"
    /// notice.
    pub async fn delete(&mut self, id: &str) -> Result<()> {
        self.sync_session().await;
        let result = self.delete_inner(id).await;
        match &result {
            Ok(()) => {
                if self.editor.selected_id() == Some(id) {
                    self.editor.cancel();
                }
                self.notices.push(Notice::success("Todo deleted"));
                self.reload().await;
            }
            Err(e) => self.notices.push(Notice::from_error("Error deleting todo", e)),
        }
        result
    }

    async fn delete_inner(&self, id: &str) -> Result<()> {
        let identity = self.require_identity()?;
        let todo = self.cached(id)?;
        self.repo.delete(&identity, todo).await
    }

    /// Signs out and drops everything that belonged to the previous identity.
    ///
    /// # Errors
    ///
    /// Returns the provider failure; nothing is reset in that case.
    pub async fn sign_out(&mut self) -> Result<()> {
        if let Err(e) = self.session.sign_out().await {
            self.notices.push(Notice::from_error("Error signing out", &e));
            return Err(e);
        }
        self.reset();
        self.notices.clear();
        self.changes.mark_unchanged();
        self.seen = SessionState::SignedOut;
        info!("Session data cleared");
        Ok(())
    }

    /// Reacts to a session change pushed by the [`SessionManager`].
    ///
    /// A change of identity drops the cache and the editor. A new signed-in
    /// identity loads its collection.
    pub async fn on_session_change(&mut self, state: SessionState) {
        if self.seen.same_identity(&state) {
            self.seen = state;
            return;
        }

        debug!(signed_in = state.identity().is_some(), "Identity changed, resetting view");
        self.reset();
        self.seen = state.clone();
        if state.identity().is_some() {
            self.reload().await;
        }
    }

    /// True if the session no longer names the identity the data belongs to.
    fn is_stale(&self) -> bool {
        !self.seen.same_identity(&self.session.state())
    }

    fn reset(&mut self) {
        self.cache.clear();
        self.editor.cancel();
    }

    fn require_identity(&self) -> Result<Identity> {
        self.session
            .current_identity()
            .ok_or_else(|| AuthError::NotAuthenticated.into())
    }

    fn cached(&self, id: &str) -> Result<&Todo> {
        let found = if self.is_stale() { None } else { self.cache.find(id) };
        found.ok_or_else(|| {
            StoreError::NotFound {
                id: id.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::LocalAttachment;
    use crate::editor::EditorState;
    use crate::memory::{MemoryBackend, MemoryIdentityProvider};
    use crate::types::{AuthSession, NewTodo};
    use chrono::{Duration, Utc};

    fn session_for(id: &str) -> AuthSession {
        AuthSession {
            access_token: format!("{id}-token"),
            refresh_token: None,
            expires_at: Utc::now() + Duration::hours(1),
            user: Identity::new(id, Some(format!("{id}@example.com"))),
        }
    }

    struct Fixture {
        backend: Arc<MemoryBackend>,
        provider: Arc<MemoryIdentityProvider>,
        app: TodoBook,
    }

    fn fixture(signed_in_as: Option<&str>) -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let provider = Arc::new(match signed_in_as {
            Some(id) => MemoryIdentityProvider::signed_in(session_for(id)),
            None => MemoryIdentityProvider::new(),
        });
        let session = Arc::new(SessionManager::new(provider.clone()));
        let app = TodoBook::new(
            session,
            TodoRepository::new(backend.clone()),
            AttachmentUploader::new(backend.clone(), "todo-images", "todo-images"),
        );
        Fixture {
            backend,
            provider,
            app,
        }
    }

    async fn seed(backend: &Arc<MemoryBackend>, owner: &str, title: &str) -> Todo {
        TodoRepository::new(backend.clone())
            .create(&Identity::new(owner, None), NewTodo::new(title, ""))
            .await
            .unwrap()
    }

    fn titles(app: &TodoBook) -> Vec<&str> {
        app.todos().iter().map(|t| t.title.as_str()).collect()
    }

    // ==================== mount tests ====================

    #[tokio::test]
    async fn mount_signed_in_loads_once() {
        let mut f = fixture(Some("alice"));
        seed(&f.backend, "alice", "one").await;

        let state = f.app.mount().await;

        assert!(matches!(state, SessionState::SignedIn(_)));
        assert_eq!(titles(&f.app), vec!["one"]);
        assert_eq!(f.backend.list_calls(), 1);
    }

    #[tokio::test]
    async fn mount_signed_out_makes_no_store_call() {
        let mut f = fixture(None);

        let state = f.app.mount().await;

        assert_eq!(state, SessionState::SignedOut);
        assert_eq!(f.backend.list_calls(), 0);
        assert!(f.app.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn mount_lookup_failure_is_a_notice() {
        let mut f = fixture(Some("alice"));
        f.provider
            .fail_lookup(AuthError::Provider("offline".to_string()));

        let state = f.app.mount().await;

        assert_eq!(state, SessionState::SignedOut);
        let notices = f.app.drain_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Error loading session");
    }

    #[tokio::test]
    async fn mount_list_failure_is_a_notice() {
        let mut f = fixture(Some("alice"));
        f.backend
            .fail_next_list(StoreError::Unavailable("offline".to_string()));

        f.app.mount().await;

        assert!(f.app.todos().is_empty());
        let notices = f.app.drain_notices();
        assert_eq!(notices[0].title, "Error fetching todos");
        assert!(notices[0].is_error());
    }

    // ==================== save tests ====================

    #[tokio::test]
    async fn save_new_todo_refreshes_and_notifies() {
        let mut f = fixture(Some("alice"));
        f.app.mount().await;

        f.app.new_todo();
        f.app.editor_mut().set_title("Buy milk");
        f.app.editor_mut().set_content("2%");
        let outcome = f.app.save().await.expect("save");

        assert!(matches!(outcome, SaveOutcome::Created(_)));
        assert_eq!(titles(&f.app), vec!["Buy milk"]);
        assert_eq!(f.app.editor().state(), &EditorState::Idle);
        assert_eq!(f.app.drain_notices(), vec![Notice::success("Todo created!")]);
        assert_eq!(f.backend.list_calls(), 2);
    }

    #[tokio::test]
    async fn save_blank_title_pushes_validation_notice() {
        let mut f = fixture(Some("alice"));
        f.app.mount().await;

        f.app.new_todo();
        f.app.editor_mut().set_title("  ");
        let result = f.app.save().await;

        assert!(result.unwrap_err().is_validation());
        assert_eq!(
            f.app.drain_notices(),
            vec![Notice::error("Title is required", None)]
        );
        assert_eq!(f.backend.write_calls(), 0);
        assert_eq!(f.app.editor().state(), &EditorState::Creating);
    }

    #[tokio::test]
    async fn save_upload_failure_keeps_form() {
        let mut f = fixture(Some("alice"));
        f.app.mount().await;
        f.backend.fail_uploads(true);

        f.app.new_todo();
        f.app.editor_mut().set_title("With picture");
        f.app
            .editor_mut()
            .attach(LocalAttachment::new("cat.png", vec![1, 2]));
        let result = f.app.save().await;

        assert!(matches!(result, Err(TodoBookError::Storage(_))));
        assert_eq!(f.backend.insert_calls(), 0);
        assert_eq!(f.app.editor().form().title, "With picture");
        let notices = f.app.drain_notices();
        assert_eq!(notices[0].title, "Error saving todo");
    }

    #[tokio::test]
    async fn edit_existing_todo() {
        let mut f = fixture(Some("alice"));
        let todo = seed(&f.backend, "alice", "draft").await;
        f.app.mount().await;

        f.app.select(&todo.id).expect("cached");
        f.app.editor_mut().set_title("final");
        let outcome = f.app.save().await.unwrap();

        assert_eq!(outcome, SaveOutcome::Updated(todo.id.clone()));
        assert_eq!(titles(&f.app), vec!["final"]);
        assert!(f.app.todos()[0].updated_at.is_some());
        assert_eq!(f.app.drain_notices(), vec![Notice::success("Todo updated!")]);
    }

    #[tokio::test]
    async fn refresh_failure_after_save_does_not_fail_save() {
        let mut f = fixture(Some("alice"));
        f.app.mount().await;

        f.app.new_todo();
        f.app.editor_mut().set_title("kept");
        f.backend
            .fail_next_list(StoreError::Unavailable("flaky".to_string()));
        let result = f.app.save().await;

        assert!(result.is_ok());
        assert_eq!(f.backend.rows().len(), 1);
        assert!(f.app.todos().is_empty());
        let notices = f.app.drain_notices();
        assert_eq!(notices[0], Notice::success("Todo created!"));
        assert_eq!(notices[1].title, "Error fetching todos");
    }

    // ==================== toggle/delete tests ====================

    #[tokio::test]
    async fn toggle_flips_and_refreshes() {
        let mut f = fixture(Some("alice"));
        let todo = seed(&f.backend, "alice", "task").await;
        f.app.mount().await;

        f.app.toggle(&todo.id).await.expect("toggle");

        assert!(f.app.todos()[0].completed);
        assert!(f.app.drain_notices().is_empty());
    }

    #[tokio::test]
    async fn toggle_failure_pushes_notice() {
        let mut f = fixture(Some("alice"));
        let todo = seed(&f.backend, "alice", "task").await;
        f.app.mount().await;
        f.backend.fail_next_write(StoreError::PermissionDenied);

        assert!(f.app.toggle(&todo.id).await.is_err());

        assert!(!f.app.todos()[0].completed);
        let notices = f.app.drain_notices();
        assert_eq!(notices[0].title, "Error updating todo");
        assert_eq!(notices[0].description.as_deref(), Some("permission denied"));
    }

    #[tokio::test]
    async fn delete_removes_and_closes_editor() {
        let mut f = fixture(Some("alice"));
        let keep = seed(&f.backend, "alice", "keep").await;
        let gone = seed(&f.backend, "alice", "gone").await;
        f.app.mount().await;
        f.app.select(&gone.id).unwrap();

        f.app.delete(&gone.id).await.expect("delete");

        assert_eq!(titles(&f.app), vec!["keep"]);
        assert_eq!(f.app.todos()[0].id, keep.id);
        assert_eq!(f.app.editor().state(), &EditorState::Idle);
        assert_eq!(f.app.drain_notices(), vec![Notice::success("Todo deleted")]);
    }

    #[tokio::test]
    async fn delete_unknown_id_pushes_notice() {
        let mut f = fixture(Some("alice"));
        f.app.mount().await;

        let result = f.app.delete("missing").await;

        assert!(matches!(
            result,
            Err(TodoBookError::Store(StoreError::NotFound { .. }))
        ));
        assert_eq!(f.backend.delete_calls(), 0);
        assert_eq!(f.app.drain_notices()[0].title, "Error deleting todo");
    }

    // ==================== session tests ====================

    #[tokio::test]
    async fn sign_out_resets_everything() {
        let mut f = fixture(Some("alice"));
        let todo = seed(&f.backend, "alice", "private").await;
        f.app.mount().await;
        f.app.select(&todo.id).unwrap();
        f.backend
            .fail_next_list(StoreError::Unavailable("x".to_string()));
        assert!(!f.app.refresh().await);

        f.app.sign_out().await.expect("sign out");

        assert!(f.app.todos().is_empty());
        assert!(!f.app.cache().is_loaded());
        assert_eq!(f.app.editor().state(), &EditorState::Idle);
        assert!(f.app.notices().is_empty());
        assert_eq!(f.app.session().state(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn sign_out_failure_keeps_data() {
        let mut f = fixture(Some("alice"));
        seed(&f.backend, "alice", "mine").await;
        f.app.mount().await;
        f.provider
            .fail_sign_out(AuthError::Provider("offline".to_string()));

        assert!(f.app.sign_out().await.is_err());

        assert_eq!(titles(&f.app), vec!["mine"]);
        assert_eq!(f.app.drain_notices()[0].title, "Error signing out");
    }

    #[tokio::test]
    async fn switching_identity_reloads_for_new_user() {
        let mut f = fixture(Some("alice"));
        seed(&f.backend, "alice", "alice's").await;
        seed(&f.backend, "bob", "bob's").await;
        f.app.mount().await;
        assert_eq!(titles(&f.app), vec!["alice's"]);

        f.app
            .session()
            .apply(crate::session::SessionEvent::SignedIn(session_for("bob")));
        let state = f.app.session().state();
        f.app.on_session_change(state).await;

        assert_eq!(titles(&f.app), vec!["bob's"]);
    }

    #[tokio::test]
    async fn same_identity_change_does_not_reload() {
        let mut f = fixture(Some("alice"));
        f.app.mount().await;
        let calls = f.backend.list_calls();

        let state = f.app.session().state();
        f.app.on_session_change(state).await;

        assert_eq!(f.backend.list_calls(), calls);
    }

    #[tokio::test]
    async fn signed_out_change_clears_cache_and_editor() {
        let mut f = fixture(Some("alice"));
        let todo = seed(&f.backend, "alice", "private").await;
        f.app.mount().await;
        f.app.select(&todo.id).unwrap();
        let calls = f.backend.list_calls();

        f.app.on_session_change(SessionState::SignedOut).await;

        assert!(!f.app.cache().is_loaded());
        assert!(f.app.cache().snapshot().is_empty());
        assert_eq!(f.app.editor().state(), &EditorState::Idle);
        assert_eq!(f.app.editor().form().title, "");
        assert_eq!(f.backend.list_calls(), calls);
    }

    #[tokio::test]
    async fn todos_hidden_until_identity_change_is_applied() {
        let mut f = fixture(Some("alice"));
        let todo = seed(&f.backend, "alice", "private").await;
        f.app.mount().await;

        f.app
            .session()
            .apply(crate::session::SessionEvent::SignedOut);

        assert!(f.app.todos().is_empty());
        assert!(f.app.select(&todo.id).is_err());
        // The snapshot is only dropped once the change is applied.
        assert!(f.app.cache().is_loaded());

        f.app.sync_session().await;

        assert!(!f.app.cache().is_loaded());
    }

    #[tokio::test]
    async fn intents_apply_pending_identity_change_first() {
        let mut f = fixture(Some("alice"));
        let todo = seed(&f.backend, "alice", "alice's").await;
        seed(&f.backend, "bob", "bob's").await;
        f.app.mount().await;
        f.app.select(&todo.id).unwrap();

        f.app
            .session()
            .apply(crate::session::SessionEvent::SignedIn(session_for("bob")));
        let result = f.app.save().await;

        // The editor was reset for bob, so there is nothing to save.
        assert!(result.unwrap_err().is_validation());
        assert_eq!(titles(&f.app), vec!["bob's"]);
        assert_eq!(f.backend.write_calls(), 0);
    }

    #[test]
    fn notice_display() {
        assert_eq!(Notice::success("Todo deleted").to_string(), "Todo deleted");
        assert_eq!(
            Notice::error("Error saving todo", Some("permission denied".to_string())).to_string(),
            "Error saving todo: permission denied"
        );
    }
}
