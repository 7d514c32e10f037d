//! Supabase adapters for the identity provider, relational store and object
//! store.
//!
//! All three share one [`SupabaseClient`], which owns the HTTP client, the
//! project URL and the anon key. Each adapter implements the matching
//! collaborator trait:
//!
//! - [`SupabaseAuth`] implements [`IdentityProvider`](crate::session::IdentityProvider)
//!   via GoTrue (`/auth/v1`)
//! - [`SupabaseTodoStore`] implements [`TodoStore`](crate::repository::TodoStore)
//!   via PostgREST (`/rest/v1`)
//! - [`SupabaseObjectStore`] implements [`ObjectStore`](crate::attachment::ObjectStore)
//!   via Storage (`/storage/v1`)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use todobook_client::supabase::{SupabaseAuth, SupabaseClient, SupabaseTodoStore};
//!
//! let client = SupabaseClient::new("https://your-project.supabase.co", "your-anon-key")?;
//! let auth = Arc::new(SupabaseAuth::new(client.clone()));
//! let session = auth.sign_in_with_password("me@example.com", "hunter2").await?;
//!
//! let store = SupabaseTodoStore::new(client, "todos");
//! ```

mod auth;
mod rest;
mod storage;

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::Config;
use crate::error::StoreError;

pub use auth::SupabaseAuth;
pub use rest::SupabaseTodoStore;
pub use storage::SupabaseObjectStore;

/// Default timeout for Supabase API requests.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur when talking to Supabase.
///
/// Adapters translate these into the collaborator-level error types
/// ([`AuthError`](crate::error::AuthError), [`StoreError`],
/// [`StorageError`](crate::error::StorageError)).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupabaseError {
    /// The bearer token is invalid or expired (HTTP 401).
    #[error("unauthorized: invalid or expired JWT")]
    Unauthorized,

    /// The request was authenticated but not allowed (HTTP 403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The addressed resource does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other 4xx answer.
    #[error("request rejected with status {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body.
        message: String,
    },

    /// The request timed out.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Supabase is unreachable or answered with a 5xx.
    #[error("supabase unavailable: {0}")]
    Unavailable(String),

    /// Failed to parse the response from Supabase.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Client configuration error.
    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl From<SupabaseError> for StoreError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Unauthorized | SupabaseError::Forbidden(_) => Self::PermissionDenied,
            SupabaseError::Timeout(d) => Self::Timeout(d),
            SupabaseError::Unavailable(msg) | SupabaseError::Configuration(msg) => {
                Self::Unavailable(msg)
            }
            other @ (SupabaseError::NotFound(_)
            | SupabaseError::Rejected { .. }
            | SupabaseError::InvalidResponse(_)) => Self::InvalidResponse(other.to_string()),
        }
    }
}

/// Shape shared by GoTrue, PostgREST and Storage error bodies.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.error_description)
            .or(self.msg)
            .or(self.error)
    }
}

/// Shared HTTP transport for the Supabase adapters.
///
/// Cheap to clone; the underlying `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    /// The underlying HTTP client.
    http_client: Client,

    /// The base URL of the Supabase project (e.g., `https://xxx.supabase.co`).
    base_url: String,

    /// The Supabase anonymous/public key for API authentication.
    anon_key: String,

    /// Per-request timeout, reported in [`SupabaseError::Timeout`].
    timeout: Duration,
}

impl SupabaseClient {
    /// Creates a new Supabase client with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Configuration`] if the HTTP client cannot be created.
    pub fn new(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
    ) -> Result<Self, SupabaseError> {
        Self::with_timeout(base_url, anon_key, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a new Supabase client with a custom per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Configuration`] if the HTTP client cannot be created.
    pub fn with_timeout(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SupabaseError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let anon_key = anon_key.into();

        let http_client = Client::builder().timeout(timeout).build().map_err(|e| {
            SupabaseError::Configuration(format!("failed to create HTTP client: {e}"))
        })?;

        Ok(Self {
            http_client,
            base_url,
            anon_key,
            timeout,
        })
    }

    /// Creates a client from the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::Configuration`] if the HTTP client cannot be created.
    pub fn from_config(config: &Config) -> Result<Self, SupabaseError> {
        Self::with_timeout(
            &config.supabase_url,
            &config.supabase_anon_key,
            config.request_timeout,
        )
    }

    /// Returns the base URL of the Supabase project.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts a request to `path` (relative to the project URL).
    ///
    /// Sends the anon key as `apikey`, and as the bearer token unless a user
    /// token is given.
    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        let token = bearer.unwrap_or(&self.anon_key);
        debug!(method = %method, url = %url, user_token = bearer.is_some(), "Supabase request");

        self.http_client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {token}"))
    }

    /// Sends a request and turns transport failures and error statuses into
    /// [`SupabaseError`].
    async fn send(&self, request: RequestBuilder) -> Result<Response, SupabaseError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SupabaseError::Timeout(self.timeout)
            } else if e.is_connect() {
                SupabaseError::Unavailable(format!("connection failed: {e}"))
            } else {
                SupabaseError::Unavailable(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| body.clone());

        let err = match status {
            StatusCode::UNAUTHORIZED => SupabaseError::Unauthorized,
            StatusCode::FORBIDDEN => SupabaseError::Forbidden(message),
            StatusCode::NOT_FOUND => SupabaseError::NotFound(message),
            s if s.is_client_error() => SupabaseError::Rejected {
                status: s.as_u16(),
                message,
            },
            s => {
                error!(status = %s, body = %body, "Unexpected response from Supabase");
                SupabaseError::Unavailable(format!("unexpected status {s}: {message}"))
            }
        };
        debug!(status = %status, error = %err, "Supabase request failed");
        Err(err)
    }

    /// Parses a JSON response body.
    async fn json<T: serde::de::DeserializeOwned>(
        response: Response,
        what: &str,
    ) -> Result<T, SupabaseError> {
        response.json().await.map_err(|e| {
            SupabaseError::InvalidResponse(format!("failed to parse {what} response: {e}"))
        })
    }
}
