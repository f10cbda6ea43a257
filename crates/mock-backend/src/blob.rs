//! In-memory blob store.

use std::collections::HashMap;

use async_trait::async_trait;
use mecanica_core::{BackendError, BlobStore};
use tokio::sync::Mutex;

/// An uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// A blob store that keeps uploads in memory and refuses overwrites.
pub struct MemoryBlobStore {
    base_url: String,
    objects: Mutex<HashMap<String, StoredObject>>,
    failure: Mutex<Option<BackendError>>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

impl MemoryBlobStore {
    /// Create a store whose public URLs start with `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            objects: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
        }
    }

    /// Make every upload fail with `error` until cleared with `None`.
    pub async fn set_failure(&self, error: Option<BackendError>) {
        *self.failure.lock().await = error;
    }

    /// Object stored under `bucket/path`.
    pub async fn object(&self, bucket: &str, path: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(&format!("{bucket}/{path}")).cloned()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Whether nothing has been uploaded.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_blob(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        if let Some(err) = self.failure.lock().await.clone() {
            return Err(err);
        }

        let key = format!("{bucket}/{path}");
        let mut objects = self.objects.lock().await;
        if objects.contains_key(&key) {
            return Err(BackendError::Rejected {
                status: 409,
                message: "The resource already exists".to_string(),
            });
        }

        objects.insert(
            key.clone(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(format!("{}/{}", self.base_url, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_returns_public_url() {
        let store = MemoryBlobStore::default();
        let url = store
            .upload_blob("chat-attachments", "u1/a.png", vec![1, 2, 3], "image/png")
            .await
            .unwrap();
        assert_eq!(url, "memory://blobs/chat-attachments/u1/a.png");

        let object = store.object("chat-attachments", "u1/a.png").await.unwrap();
        assert_eq!(object.content_type, "image/png");
    }

    #[tokio::test]
    async fn test_upload_refuses_overwrite() {
        let store = MemoryBlobStore::default();
        store.upload_blob("b", "p", vec![], "text/plain").await.unwrap();
        assert!(store.upload_blob("b", "p", vec![], "text/plain").await.is_err());
        assert_eq!(store.len().await, 1);
    }
}
