//! Attachment uploader: local image file to a durable public URL.
//!
//! Storage keys are `{prefix}/{uuid}.{ext}`. The random UUID keeps concurrent
//! uploads from different sessions or items from colliding; the extension is
//! carried over from the original file name so the object store can serve
//! it with a sensible content type.
//!
//! Uploads are attempted exactly once. Failures go straight back to the
//! caller.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StorageError;

/// Fallback content type for unknown extensions.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// The binary object storage collaborator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `bucket`/`key`.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Derives the public URL for `bucket`/`key`. Never fails.
    fn public_url(&self, bucket: &str, key: &str) -> String;
}

/// A file picked by the user but not yet uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalAttachment {
    /// Original file name, used for the extension and for previews.
    pub file_name: String,

    /// MIME type sent with the upload.
    pub content_type: String,

    /// File contents.
    pub bytes: Vec<u8>,
}

impl LocalAttachment {
    /// Creates an attachment from in-memory bytes, guessing the content type
    /// from the file name.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(&file_name).to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    /// Reads an attachment from disk.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be read.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        debug!(file_name = %file_name, size = bytes.len(), "Read local attachment");
        Ok(Self::new(file_name, bytes))
    }

    /// The extension of the original file name, lowercased, if it has one.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }
}

impl std::fmt::Debug for LocalAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAttachment")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Uploads attachments to one bucket of an [`ObjectStore`].
#[derive(Clone)]
pub struct AttachmentUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl AttachmentUploader {
    /// Creates an uploader writing to `bucket` under `prefix`.
    ///
    /// An empty prefix puts objects at the bucket root.
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Uploads the attachment and returns its public URL.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the upload fails. Nothing is retried.
    pub async fn upload(&self, attachment: &LocalAttachment) -> Result<String, StorageError> {
        let key = self.storage_key(attachment);

        debug!(
            bucket = %self.bucket,
            key = %key,
            size = attachment.bytes.len(),
            "Uploading attachment"
        );

        if let Err(e) = self
            .store
            .put_object(
                &self.bucket,
                &key,
                attachment.bytes.clone(),
                &attachment.content_type,
            )
            .await
        {
            warn!(bucket = %self.bucket, key = %key, error = %e, "Attachment upload failed");
            return Err(e);
        }

        let url = self.store.public_url(&self.bucket, &key);
        info!(bucket = %self.bucket, key = %key, "Attachment uploaded");
        Ok(url)
    }

    /// Builds a fresh, collision-resistant key for the attachment.
    fn storage_key(&self, attachment: &LocalAttachment) -> String {
        let name = match attachment.extension() {
            Some(ext) => format!("{}.{ext}", Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        };
        if self.prefix.is_empty() {
            name
        } else {
            format!("{}/{name}", self.prefix)
        }
    }
}

/// Guesses an image MIME type from a file name.
fn content_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("avif") => "image/avif",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
