//! Object storage uploads.

use async_trait::async_trait;
use mecanica_core::{BackendError, BlobStore};
use reqwest::Method;
use tracing::debug;

use crate::client::SupabaseClient;

#[async_trait]
impl BlobStore for SupabaseClient {
    async fn upload_blob(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let url = self.config().storage_upload_url(bucket, path);
        debug!(bucket, path, size = bytes.len(), "Uploading object");

        let request = self
            .request(Method::POST, &url)
            .await
            .header("Content-Type", content_type)
            .header("cache-control", "3600")
            .header("x-upsert", "false")
            .body(bytes);

        self.send_empty(request).await?;
        Ok(self.config().public_object_url(bucket, path))
    }
}
