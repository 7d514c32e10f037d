//! In-process backend for tests and local experimentation.
//!
//! [`MemoryBackend`] plays both the relational store and the object store,
//! and [`MemoryIdentityProvider`] plays the identity provider. They honour
//! the same contracts as the Supabase adapters:
//!
//! - rows are scoped to their owner; touching someone else's row is
//!   [`StoreError::PermissionDenied`]
//! - lists are ordered by `created_at`, newest first, and `created_at` is
//!   strictly increasing even for inserts within the same clock tick
//! - deleting a missing row is a no-op
//!
//! Failure injection and call counters let tests observe exactly which
//! remote calls a flow made.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::attachment::ObjectStore;
use crate::error::{AuthError, StorageError, StoreError};
use crate::repository::TodoStore;
use crate::session::{IdentityProvider, SessionEvent};
use crate::types::{AuthSession, Identity, Todo, TodoInsert, TodoPatch};

/// Capacity of the identity provider's event channel.
const SESSION_EVENT_CAPACITY: usize = 16;

/// An object held by [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Default)]
struct Counters {
    list: usize,
    insert: usize,
    update: usize,
    delete: usize,
    upload: usize,
}

#[derive(Debug, Default)]
struct BackendState {
    rows: Vec<Todo>,
    objects: Vec<StoredObject>,
    last_created_at: Option<DateTime<Utc>>,
    list_failures: VecDeque<StoreError>,
    write_failures: VecDeque<StoreError>,
    fail_uploads: bool,
    calls: Counters,
}

/// In-memory relational store and object store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<BackendState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `select_all` fail with `error`.
    pub fn fail_next_list(&self, error: StoreError) {
        self.lock().list_failures.push_back(error);
    }

    /// Makes the next insert, update or delete fail with `error`.
    pub fn fail_next_write(&self, error: StoreError) {
        self.lock().write_failures.push_back(error);
    }

    /// Makes every upload fail until switched off again.
    pub fn fail_uploads(&self, fail: bool) {
        self.lock().fail_uploads = fail;
    }

    /// Every stored row, regardless of owner, in insertion order.
    pub fn rows(&self) -> Vec<Todo> {
        self.lock().rows.clone()
    }

    /// Every stored object, in upload order.
    pub fn objects(&self) -> Vec<StoredObject> {
        self.lock().objects.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().calls.list
    }

    pub fn insert_calls(&self) -> usize {
        self.lock().calls.insert
    }

    pub fn update_calls(&self) -> usize {
        self.lock().calls.update
    }

    pub fn delete_calls(&self) -> usize {
        self.lock().calls.delete
    }

    pub fn upload_calls(&self) -> usize {
        self.lock().calls.upload
    }

    /// Total number of calls that would have written to the relational store.
    pub fn write_calls(&self) -> usize {
        let state = self.lock();
        state.calls.insert + state.calls.update + state.calls.delete
    }
}

impl BackendState {
    /// Returns a creation timestamp strictly after every previous one.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let created_at = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(created_at);
        created_at
    }

    /// Locates a row the identity may write, or explains why not.
    fn owned_row_index(&self, identity: &Identity, id: &str) -> Result<Option<usize>, StoreError> {
        match self.rows.iter().position(|t| t.id == id) {
            Some(idx) if self.rows[idx].user_id == identity.id => Ok(Some(idx)),
            Some(_) => Err(StoreError::PermissionDenied),
            None => Ok(None),
        }
    }
}

fn require_identity(identity: &Identity) -> Result<(), StoreError> {
    if identity.id.is_empty() {
        Err(StoreError::PermissionDenied)
    } else {
        Ok(())
    }
}

#[async_trait]
impl TodoStore for MemoryBackend {
    async fn select_all(&self, identity: &Identity) -> Result<Vec<Todo>, StoreError> {
        let mut state = self.lock();
        state.calls.list += 1;
        if let Some(error) = state.list_failures.pop_front() {
            return Err(error);
        }
        require_identity(identity)?;

        let mut todos: Vec<Todo> = state
            .rows
            .iter()
            .filter(|t| t.user_id == identity.id)
            .cloned()
            .collect();
        todos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        trace!(user_id = %identity.id, count = todos.len(), "Memory select");
        Ok(todos)
    }

    async fn insert(&self, identity: &Identity, row: TodoInsert) -> Result<Todo, StoreError> {
        let mut state = self.lock();
        state.calls.insert += 1;
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        require_identity(identity)?;
        if row.user_id != identity.id {
            return Err(StoreError::PermissionDenied);
        }

        let todo = Todo {
            id: Uuid::new_v4().to_string(),
            title: row.title,
            content: row.content,
            completed: false,
            image_url: row.image_url,
            created_at: state.next_created_at(),
            updated_at: None,
            user_id: row.user_id,
        };
        state.rows.push(todo.clone());
        debug!(todo_id = %todo.id, "Memory insert");
        Ok(todo)
    }

    async fn update(&self, identity: &Identity, id: &str, patch: TodoPatch) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.update += 1;
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        require_identity(identity)?;

        match state.owned_row_index(identity, id)? {
            Some(idx) => {
                patch.apply_to(&mut state.rows[idx]);
                Ok(())
            }
            None => Err(StoreError::NotFound { id: id.to_string() }),
        }
    }

    async fn delete(&self, identity: &Identity, id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.calls.delete += 1;
        if let Some(error) = state.write_failures.pop_front() {
            return Err(error);
        }
        require_identity(identity)?;

        if let Some(idx) = state.owned_row_index(identity, id)? {
            state.rows.remove(idx);
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.calls.upload += 1;
        if state.fail_uploads {
            return Err(StorageError::UploadFailed {
                key: key.to_string(),
                message: "injected upload failure".to_string(),
            });
        }
        if state.objects.iter().any(|o| o.bucket == bucket && o.key == key) {
            return Err(StorageError::UploadFailed {
                key: key.to_string(),
                message: "object already exists".to_string(),
            });
        }
        state.objects.push(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            bytes,
            content_type: content_type.to_string(),
        });
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("memory://{bucket}/{key}")
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    session: Option<AuthSession>,
    lookups: usize,
    lookup_failure: Option<AuthError>,
    sign_out_failure: Option<AuthError>,
}

/// In-memory identity provider.
#[derive(Debug)]
pub struct MemoryIdentityProvider {
    state: Mutex<ProviderState>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIdentityProvider {
    /// Creates a provider with nobody signed in.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            state: Mutex::new(ProviderState::default()),
            events,
        }
    }

    /// Creates a provider with an existing session.
    pub fn signed_in(session: AuthSession) -> Self {
        let provider = Self::new();
        provider.lock().session = Some(session);
        provider
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Signs a user in and broadcasts [`SessionEvent::SignedIn`].
    pub fn sign_in(&self, session: AuthSession) {
        self.lock().session = Some(session.clone());
        let _ = self.events.send(SessionEvent::SignedIn(session));
    }

    /// Swaps in fresh credentials and broadcasts [`SessionEvent::TokenRefreshed`].
    pub fn refresh(&self, session: AuthSession) {
        self.lock().session = Some(session.clone());
        let _ = self.events.send(SessionEvent::TokenRefreshed(session));
    }

    /// Number of `current_session` calls so far.
    pub fn lookup_calls(&self) -> usize {
        self.lock().lookups
    }

    /// Makes the next `current_session` call fail.
    pub fn fail_lookup(&self, error: AuthError) {
        self.lock().lookup_failure = Some(error);
    }

    /// Makes the next `sign_out` call fail.
    pub fn fail_sign_out(&self, error: AuthError) {
        self.lock().sign_out_failure = Some(error);
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn current_session(&self) -> Result<Option<AuthSession>, AuthError> {
        let mut state = self.lock();
        state.lookups += 1;
        if let Some(error) = state.lookup_failure.take() {
            return Err(error);
        }
        Ok(state.session.clone())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        {
            let mut state = self.lock();
            if let Some(error) = state.sign_out_failure.take() {
                return Err(error);
            }
            state.session = None;
        }
        let _ = self.events.send(SessionEvent::SignedOut);
        Ok(())
    }
}
