//! Data types shared by the Todo Book client.
//!
//! All persisted types serialize to snake_case JSON matching the columns of
//! the `todos` table, so rows returned by the relational store deserialize
//! directly into [`Todo`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single todo item as persisted by the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    /// Store-assigned identifier, immutable once created.
    pub id: String,

    /// Short title. Never blank for records created through the editor.
    pub title: String,

    /// Free-text body, may be empty.
    #[serde(default)]
    pub content: String,

    /// Whether the item has been checked off.
    #[serde(default)]
    pub completed: bool,

    /// Public URL of an attached image, if any.
    #[serde(default)]
    pub image_url: Option<String>,

    /// When the store inserted the row.
    pub created_at: DateTime<Utc>,

    /// When the row was last updated through the edit path.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    /// Identifier of the owning identity.
    #[serde(default)]
    pub user_id: String,
}

/// Payload for creating a todo, before `user_id` is stamped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewTodo {
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
}

impl NewTodo {
    /// Creates a payload with no attachment.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            image_url: None,
        }
    }

    /// Sets the attachment reference.
    #[must_use]
    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}

/// Row written by an insert. Carries the owner explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TodoInsert {
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub image_url: Option<String>,
}

/// Partial field set for an update-by-id.
///
/// Fields left as `None` are not sent. `image_url` is doubly optional so a
/// patch can distinguish "leave unchanged" from "clear the attachment".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TodoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TodoPatch {
    /// Applies the patch to a todo in place.
    pub fn apply_to(&self, todo: &mut Todo) {
        if let Some(title) = &self.title {
            todo.title.clone_from(title);
        }
        if let Some(content) = &self.content {
            todo.content.clone_from(content);
        }
        if let Some(image_url) = &self.image_url {
            todo.image_url.clone_from(image_url);
        }
        if let Some(completed) = self.completed {
            todo.completed = completed;
        }
        if let Some(updated_at) = self.updated_at {
            todo.updated_at = Some(updated_at);
        }
    }
}

/// An authenticated user.
///
/// The optional access token is the credential the remote adapters present
/// on the user's behalf. It is redacted from `Debug` output and ignored by
/// [`Identity::same_as`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier (UUID format for Supabase users).
    pub id: String,

    /// Display email, if the provider knows one.
    pub email: Option<String>,

    #[serde(skip)]
    access_token: Option<String>,
}

impl Identity {
    /// Creates an identity without a credential.
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            id: id.into(),
            email,
            access_token: None,
        }
    }

    /// Attaches a bearer token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Returns the bearer token, if any.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns true if both values name the same user, whatever their tokens.
    pub fn same_as(&self, other: &Identity) -> bool {
        self.id == other.id && self.email == other.email
    }

    /// Label used when showing who is signed in.
    pub fn display_name(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("email", &self.email)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// A provider session: credentials plus the user they belong to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user: Identity,
}

impl AuthSession {
    /// Returns the session's user with the access token attached.
    pub fn identity(&self) -> Identity {
        self.user.clone().with_access_token(self.access_token.clone())
    }

    /// Returns true if the access token has expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
