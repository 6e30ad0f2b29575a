use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Instant;
use tokio::fs;
use uuid::Uuid;

use crate::keys::generate_storage_key;
use crate::traits::{check_key, Storage, StorageError, StorageOp, StorageResult};
use crate::StorageBackend;

/// Filesystem storage rooted at one directory. Keys map to relative paths below it.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Creates `root` if it does not exist yet.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::Config(format!("cannot create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }

    fn failure(&self, op: StorageOp, key: &str, err: std::io::Error) -> StorageError {
        StorageError::backend(StorageBackend::Local, op, key, err)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn store(&self, owner_id: Uuid, filename: &str, data: Bytes) -> StorageResult<String> {
        let key = generate_storage_key(owner_id, filename);
        let path = self.path_for(&key)?;
        let started = Instant::now();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| self.failure(StorageOp::Store, &key, e))?;
        }

        // Readers never observe a partially written object.
        let partial = path.with_extension("part");
        fs::write(&partial, &data)
            .await
            .map_err(|e| self.failure(StorageOp::Store, &key, e))?;
        fs::rename(&partial, &path)
            .await
            .map_err(|e| self.failure(StorageOp::Store, &key, e))?;

        tracing::debug!(
            key = %key,
            size_bytes = data.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Stored document on local disk"
        );
        Ok(key)
    }

    async fn fetch(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(self.failure(StorageOp::Fetch, key, e)),
        }
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %key, "Removed document from local disk");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.failure(StorageOp::Remove, key, e)),
        }
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
