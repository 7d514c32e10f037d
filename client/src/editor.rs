//! Editor state machine for creating and editing todos.
//!
//! # States
//!
//! ```text
//!            new_todo()               select(todo)
//!   Idle ───────────────► Creating ───────────────► Editing(todo)
//!    ▲  ◄──────────────────┘  ▲  ◄──────────────────┘    │
//!    │    cancel()/save()     │        new_todo()        │
//!    └────────────────────────┴──────────────────────────┘
//!                      cancel() / save()
//! ```
//!
//! The pending attachment lives next to the state tag rather than inside
//! it: picking a file never changes state, and switching state always clears
//! it.
//!
//! A failed save leaves the state and the typed fields untouched so the
//! user can fix the problem and try again without retyping anything. Once
//! an attachment has been uploaded its URL moves into the form, so a retry
//! after a failed write does not upload it again.

use tracing::{debug, warn};

use crate::attachment::{AttachmentUploader, LocalAttachment};
use crate::error::{AuthError, Result, TodoBookError};
use crate::repository::TodoRepository;
use crate::types::{Identity, NewTodo, Todo};

/// Which item, if any, the editor is working on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EditorState {
    /// Nothing selected and nothing being created.
    #[default]
    Idle,

    /// A blank form for a new todo.
    Creating,

    /// A form pre-populated from an existing todo.
    Editing(Todo),
}

/// The editable fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TodoForm {
    pub title: String,
    pub content: String,
    /// Persisted attachment reference, if one is kept.
    pub image_url: Option<String>,
}

impl TodoForm {
    fn from_todo(todo: &Todo) -> Self {
        Self {
            title: todo.title.clone(),
            content: todo.content.clone(),
            image_url: todo.image_url.clone(),
        }
    }
}

/// What the editor would show as the attached image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePreview {
    /// A picked file that has not been uploaded yet.
    Local(String),

    /// An already-stored attachment.
    Remote(String),
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Created(Todo),
    Updated(String),
}

/// Form state plus the save/cancel lifecycle.
#[derive(Debug, Default)]
pub struct Editor {
    state: EditorState,
    form: TodoForm,
    pending: Option<LocalAttachment>,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn form(&self) -> &TodoForm {
        &self.form
    }

    pub fn pending_attachment(&self) -> Option<&LocalAttachment> {
        self.pending.as_ref()
    }

    /// Id of the todo being edited, if any.
    pub fn selected_id(&self) -> Option<&str> {
        match &self.state {
            EditorState::Editing(todo) => Some(&todo.id),
            _ => None,
        }
    }

    /// Heading shown above the editor pane.
    pub fn heading(&self) -> &'static str {
        match self.state {
            EditorState::Idle => "Select a Todo",
            EditorState::Creating => "Create New Todo",
            EditorState::Editing(_) => "Edit Todo",
        }
    }

    /// Starts a new todo with a blank form.
    pub fn new_todo(&mut self) {
        self.state = EditorState::Creating;
        self.reset_form();
    }

    /// Edits `todo`, discarding any unsaved input.
    pub fn select(&mut self, todo: Todo) {
        self.form = TodoForm::from_todo(&todo);
        self.pending = None;
        self.state = EditorState::Editing(todo);
    }

    /// Abandons the form and returns to idle.
    pub fn cancel(&mut self) {
        self.state = EditorState::Idle;
        self.reset_form();
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.form.title = title.into();
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.form.content = content.into();
    }

    /// Picks a local file as the attachment to upload on save.
    ///
    /// Ignored while idle.
    pub fn attach(&mut self, attachment: LocalAttachment) {
        if self.state == EditorState::Idle {
            debug!("Ignoring attachment while idle");
            return;
        }
        self.pending = Some(attachment);
    }

    /// Drops both the pending file and the persisted reference.
    pub fn remove_image(&mut self) {
        self.pending = None;
        self.form.image_url = None;
    }

    /// The image the form currently shows, preferring a pending file.
    pub fn image_preview(&self) -> Option<ImagePreview> {
        if let Some(pending) = &self.pending {
            return Some(ImagePreview::Local(pending.file_name.clone()));
        }
        self.form.image_url.clone().map(ImagePreview::Remote)
    }

    /// Saves the form.
    ///
    /// Steps, in order: validate the title, upload any pending attachment,
    /// require an identity, then create or update. Only a fully successful
    /// save returns the editor to idle.
    ///
    /// # Errors
    ///
    /// - [`TodoBookError::Validation`] for a blank title or when idle
    /// - [`TodoBookError::Storage`] if the attachment upload fails; no
    ///   create or update is attempted
    /// - [`TodoBookError::Auth`] if there is no identity
    /// - [`TodoBookError::Store`] if the create or update fails
    pub async fn save(
        &mut self,
        identity: Option<&Identity>,
        repo: &TodoRepository,
        uploader: &AttachmentUploader,
    ) -> Result<SaveOutcome> {
        let editing_id = match &self.state {
            EditorState::Idle => return Err(TodoBookError::validation("no todo selected")),
            EditorState::Creating => None,
            EditorState::Editing(todo) => Some(todo.id.clone()),
        };
        if self.form.title.trim().is_empty() {
            return Err(TodoBookError::validation("Title is required"));
        }

        if let Some(pending) = &self.pending {
            // The stored object outlives a failed write; a retry reuses it.
            let url = uploader.upload(pending).await?;
            self.form.image_url = Some(url);
            self.pending = None;
        }
        let image_url = self.form.image_url.clone();

        let Some(identity) = identity else {
            warn!("Save attempted without an identity");
            return Err(AuthError::NotAuthenticated.into());
        };

        let outcome = match editing_id {
            None => {
                let new = NewTodo {
                    title: self.form.title.clone(),
                    content: self.form.content.clone(),
                    image_url,
                };
                SaveOutcome::Created(repo.create(identity, new).await?)
            }
            Some(id) => {
                repo.update(
                    identity,
                    &id,
                    self.form.title.clone(),
                    self.form.content.clone(),
                    image_url,
                )
                .await?;
                SaveOutcome::Updated(id)
            }
        };

        self.cancel();
        Ok(outcome)
    }

    fn reset_form(&mut self) {
        self.form = TodoForm::default();
        self.pending = None;
    }
}
