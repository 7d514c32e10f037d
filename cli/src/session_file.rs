//! On-disk persistence of the signed-in session.
//!
//! The session is stored as JSON with owner-only permissions on Unix, since
//! it carries the refresh token.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;
use todobook_client::session::SessionEvent;
use todobook_client::AuthSession;
use tracing::{debug, warn};

/// Errors reading or writing the session file.
#[derive(Error, Debug)]
pub enum SessionFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed session file: {0}")]
    Json(#[from] serde_json::Error),
}

/// The session file at a fixed path.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored session, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(&self) -> Result<Option<AuthSession>, SessionFileError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Writes the session, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, session: &AuthSession) -> Result<(), SessionFileError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(session)?;

        let mut opts = OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&self.path)?;

        // `mode` only applies on creation; tighten a file left by older runs.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        file.write_all(json.as_bytes())?;
        file.flush()?;

        debug!(path = %self.path.display(), "Session saved");
        Ok(())
    }

    /// Deletes the session file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self) -> Result<(), SessionFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Session removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Mirrors provider session events into the session file.
pub struct SessionSync {
    events: Receiver<SessionEvent>,
    file: SessionFile,
}

impl SessionSync {
    pub fn new(events: Receiver<SessionEvent>, file: SessionFile) -> Self {
        Self { events, file }
    }

    /// Applies every event received so far.
    ///
    /// Sign-ins and refreshes rewrite the file; a sign-out removes it.
    pub fn flush(&mut self) -> Result<(), SessionFileError> {
        loop {
            match self.events.try_recv() {
                Ok(SessionEvent::SignedIn(session) | SessionEvent::TokenRefreshed(session)) => {
                    self.file.save(&session)?;
                }
                Ok(SessionEvent::SignedOut) => self.file.remove()?,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed session events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            }
        }
    }
}
