//! Error types for the Todo Book client.
//!
//! The taxonomy follows the four user-visible failure kinds of the CRUD flow,
//! plus configuration and local I/O:
//!
//! - [`AuthError`] - no or invalid identity for an operation that needs one
//! - [`TodoBookError::Validation`] - rejected before any remote call
//! - [`StoreError`] - relational store transport or permission failure
//! - [`StorageError`] - object store upload failure
//!
//! None of these are fatal. Callers surface them as a notice and let the
//! user retry the same action.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Failures related to the authenticated identity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The operation needs a signed-in user and there is none.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The provider rejected the email/password pair.
    #[error("invalid login credentials")]
    InvalidCredentials,

    /// The session expired and could not be refreshed.
    #[error("session expired, please sign in again")]
    SessionExpired,

    /// The identity provider failed for another reason.
    #[error("identity provider error: {0}")]
    Provider(String),
}

/// Failures from the relational store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store refused the operation for this identity.
    #[error("permission denied")]
    PermissionDenied,

    /// No row with the given id is visible to this identity.
    #[error("todo {id} not found")]
    NotFound {
        /// The id that was addressed.
        id: String,
    },

    /// The request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something unexpected.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Failures from the object store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The store rejected the upload.
    #[error("failed to upload {key}: {message}")]
    UploadFailed { key: String, message: String },

    /// The upload did not complete in time.
    #[error("upload timed out after {0:?}")]
    Timeout(Duration),

    /// The object store could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Top-level error for Todo Book operations.
#[derive(Error, Debug)]
pub enum TodoBookError {
    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Input rejected before any remote call.
    #[error("validation error: {0}")]
    Validation(String),

    /// Relational store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Object store error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local file system error, e.g. reading an attachment.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TodoBookError {
    /// Creates a new validation error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use todobook_client::error::TodoBookError;
    ///
    /// let err = TodoBookError::validation("title is required");
    /// assert!(matches!(err, TodoBookError::Validation(_)));
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns `true` if the error was caught locally, before any remote call.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Human-readable message for a transient notification.
    ///
    /// This is the innermost message, without the category prefix used by
    /// `Display`.
    pub fn user_message(&self) -> String {
        match self {
            Self::Auth(err) => err.to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::Store(err) => err.to_string(),
            Self::Storage(err) => err.to_string(),
            Self::Config(err) => err.to_string(),
            Self::Io(err) => err.to_string(),
        }
    }
}

/// A specialized `Result` type for Todo Book operations.
pub type Result<T> = std::result::Result<T, TodoBookError>;
