use lectio_core::StorageConfig;
use std::sync::Arc;

#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{MemoryStorage, Storage, StorageBackend, StorageError, StorageResult};

fn required(value: &Option<String>, variable: &str) -> StorageResult<String> {
    value
        .clone()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| StorageError::Config(format!("{} is not set", variable)))
}

/// Builds the backend selected by `STORAGE_BACKEND`.
pub async fn create_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => Arc::new(S3Storage::new(
            required(&config.s3_bucket, "S3_BUCKET")?,
            required(&config.s3_region, "S3_REGION")?,
            config.s3_endpoint.clone(),
        )?),
        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            Arc::new(LocalStorage::new(required(&config.local_path, "LOCAL_STORAGE_PATH")?).await?)
        }
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        #[allow(unreachable_patterns)]
        other => {
            return Err(StorageError::Config(format!(
                "{} storage was not compiled into this build",
                other
            )))
        }
    };

    tracing::info!(backend = %storage.backend(), "Storage initialized");
    Ok(storage)
}
