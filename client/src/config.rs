//! Configuration module for the Todo Book client.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TODOBOOK_SUPABASE_URL` | Yes | - | Supabase project URL (e.g., `https://xyz.supabase.co`) |
//! | `TODOBOOK_SUPABASE_ANON_KEY` | Yes | - | Supabase anon/public key |
//! | `TODOBOOK_TODOS_TABLE` | No | `todos` | Table holding todo rows |
//! | `TODOBOOK_IMAGE_BUCKET` | No | `todo-images` | Storage bucket for attachments |
//! | `TODOBOOK_IMAGE_PREFIX` | No | `todo-images` | Key prefix inside the bucket |
//! | `TODOBOOK_REQUEST_TIMEOUT_SECS` | No | 10 | Per-request timeout (1-300) |
//! | `TODOBOOK_SESSION_PATH` | No | `~/.todobook/session.json` | Where the CLI keeps the signed-in session |
//!
//! # Example
//!
//! ```no_run
//! use todobook_client::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Supabase URL: {}", config.supabase_url);
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

/// Default table name for todo rows.
const DEFAULT_TODOS_TABLE: &str = "todos";

/// Default storage bucket for image attachments.
const DEFAULT_IMAGE_BUCKET: &str = "todo-images";

/// Default key prefix for uploaded attachments.
const DEFAULT_IMAGE_PREFIX: &str = "todo-images";

/// Default request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Bounds for the request timeout.
const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Default session directory name relative to home.
const DEFAULT_SESSION_DIR: &str = ".todobook";

/// Session file name inside the session directory.
const SESSION_FILE_NAME: &str = "session.json";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for the Todo Book client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Supabase project URL.
    pub supabase_url: String,

    /// Supabase anon/public key, sent as the `apikey` header.
    pub supabase_anon_key: String,

    /// Table holding todo rows.
    pub todos_table: String,

    /// Storage bucket for image attachments.
    pub image_bucket: String,

    /// Key prefix for uploaded attachments.
    pub image_prefix: String,

    /// Upper bound for every backend request.
    pub request_timeout: Duration,

    /// File where the signed-in session is persisted between runs.
    pub session_path: PathBuf,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `TODOBOOK_SUPABASE_URL` or `TODOBOOK_SUPABASE_ANON_KEY` is not set
    /// - `TODOBOOK_REQUEST_TIMEOUT_SECS` is not an integer between 1 and 300
    /// - No session path is given and the home directory cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        let supabase_url = required_var("TODOBOOK_SUPABASE_URL")?;
        let supabase_anon_key = required_var("TODOBOOK_SUPABASE_ANON_KEY")?;

        let todos_table = optional_var("TODOBOOK_TODOS_TABLE", DEFAULT_TODOS_TABLE);
        let image_bucket = optional_var("TODOBOOK_IMAGE_BUCKET", DEFAULT_IMAGE_BUCKET);
        let image_prefix = env::var("TODOBOOK_IMAGE_PREFIX")
            .map(|p| p.trim_matches('/').to_string())
            .unwrap_or_else(|_| DEFAULT_IMAGE_PREFIX.to_string());

        let request_timeout = match env::var("TODOBOOK_REQUEST_TIMEOUT_SECS") {
            Ok(val) => {
                let secs = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: "TODOBOOK_REQUEST_TIMEOUT_SECS".to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?;
                if !(MIN_REQUEST_TIMEOUT_SECS..=MAX_REQUEST_TIMEOUT_SECS).contains(&secs) {
                    return Err(ConfigError::InvalidValue {
                        key: "TODOBOOK_REQUEST_TIMEOUT_SECS".to_string(),
                        message: format!(
                            "timeout must be between {MIN_REQUEST_TIMEOUT_SECS} and {MAX_REQUEST_TIMEOUT_SECS} seconds, got {secs}"
                        ),
                    });
                }
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };

        let session_path = match env::var("TODOBOOK_SESSION_PATH") {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => {
                let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
                base_dirs
                    .home_dir()
                    .join(DEFAULT_SESSION_DIR)
                    .join(SESSION_FILE_NAME)
            }
        };

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            todos_table,
            image_bucket,
            image_prefix,
            request_timeout,
            session_path,
        })
    }
}

/// Reads a required, non-empty environment variable.
fn required_var(name: &str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

/// Reads an optional environment variable, falling back when unset or empty.
fn optional_var(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
