use super::{BlobStore, ImageCatalog, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local blob store used when no hosted backend is configured.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference_for(path: &str) -> String {
        format!("memory://{path}")
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects.lock().await.get(path).cloned()
    }

    #[allow(dead_code)]
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        let mut guard = self.objects.lock().await;
        if guard.contains_key(path) {
            return Err(StorageError::Status {
                status: 409,
                body: format!("object exists: {path}"),
            });
        }
        guard.insert(
            path.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(Self::reference_for(path))
    }
}

/// Entities are created on first append.
#[derive(Default)]
pub struct MemoryCatalog {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, entity_id: &str, references: Vec<String>) {
        self.entries
            .lock()
            .await
            .insert(entity_id.to_string(), references);
    }
}

#[async_trait]
impl ImageCatalog for MemoryCatalog {
    async fn list_images(&self, entity_id: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .lock()
            .await
            .get(entity_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_images(
        &self,
        entity_id: &str,
        references: &[String],
    ) -> Result<(), StorageError> {
        self.entries
            .lock()
            .await
            .entry(entity_id.to_string())
            .or_default()
            .extend(references.iter().cloned());
        Ok(())
    }
}
