use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::keys::generate_storage_key;
use crate::traits::{check_key, Storage, StorageError, StorageResult};
use crate::StorageBackend;

/// Process-local storage. Contents are lost when the last clone is dropped.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores bytes under an explicit key, bypassing key generation.
    pub async fn put(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().await.insert(key.into(), data.into());
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store(&self, owner_id: Uuid, filename: &str, data: Bytes) -> StorageResult<String> {
        let key = generate_storage_key(owner_id, filename);
        self.objects.write().await.insert(key.clone(), data);
        Ok(key)
    }

    async fn fetch(&self, key: &str) -> StorageResult<Bytes> {
        check_key(key)?;
        // Bytes clones share the buffer
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        check_key(key)?;
        self.objects.write().await.remove(key);
        Ok(())
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}
