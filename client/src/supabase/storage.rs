//! Supabase Storage-backed object store.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use super::{SupabaseAuth, SupabaseClient, SupabaseError};
use crate::attachment::ObjectStore;
use crate::error::StorageError;

/// Object store writing to Supabase Storage buckets.
///
/// Uploads carry the signed-in user's token when an auth provider is
/// attached, so bucket policies can restrict writes to authenticated users.
/// Without one, the anon key is used.
#[derive(Debug, Clone)]
pub struct SupabaseObjectStore {
    client: SupabaseClient,
    auth: Option<Arc<SupabaseAuth>>,
}

impl SupabaseObjectStore {
    /// Creates a store that uploads with the anon key.
    pub fn new(client: SupabaseClient) -> Self {
        Self { client, auth: None }
    }

    /// Uploads with the current session's access token.
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<SupabaseAuth>) -> Self {
        self.auth = Some(auth);
        self
    }
}

#[async_trait]
impl ObjectStore for SupabaseObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let token = self.auth.as_ref().and_then(|auth| auth.access_token());
        let path = format!("/storage/v1/object/{bucket}/{key}");
        let size = bytes.len();

        let request = self
            .client
            .request(Method::POST, &path, token.as_deref())
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes);

        self.client.send(request).await.map_err(|e| match e {
            SupabaseError::Timeout(d) => StorageError::Timeout(d),
            SupabaseError::Unavailable(msg) => StorageError::Unavailable(msg),
            other => StorageError::UploadFailed {
                key: key.to_string(),
                message: other.to_string(),
            },
        })?;

        debug!(bucket = %bucket, key = %key, size, "Object stored");
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{bucket}/{key}",
            self.client.base_url()
        )
    }
}
