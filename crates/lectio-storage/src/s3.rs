use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{Error as ObjectStoreError, ObjectStoreExt, PutPayload};
use std::time::Instant;
use uuid::Uuid;

use crate::keys::generate_storage_key;
use crate::traits::{check_key, Storage, StorageError, StorageOp, StorageResult};
use crate::StorageBackend;

/// S3 (or S3-compatible) bucket storage via `object_store`.
///
/// Credentials come from the usual `AWS_*` environment variables.
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
}

impl S3Storage {
    /// `endpoint` selects an S3-compatible provider such as MinIO; plain HTTP is
    /// allowed only when the endpoint itself is `http://`.
    pub fn new(bucket: String, region: String, endpoint: Option<String>) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(&bucket);
        if let Some(endpoint) = endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::Config(format!("S3 bucket {}: {}", bucket, e)))?;
        Ok(Self { store, bucket })
    }

    fn location(key: &str) -> StorageResult<Path> {
        check_key(key)?;
        Ok(Path::from(key))
    }

    fn failure(&self, op: StorageOp, key: &str, err: ObjectStoreError) -> StorageError {
        tracing::warn!(bucket = %self.bucket, key = %key, op = %op, error = %err, "S3 request failed");
        StorageError::backend(StorageBackend::S3, op, key, err)
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn store(&self, owner_id: Uuid, filename: &str, data: Bytes) -> StorageResult<String> {
        let key = generate_storage_key(owner_id, filename);
        let location = Self::location(&key)?;
        let size = data.len();
        let started = Instant::now();

        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| self.failure(StorageOp::Store, &key, e))?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = started.elapsed().as_millis() as u64,
            "Stored document in S3"
        );
        Ok(key)
    }

    async fn fetch(&self, key: &str) -> StorageResult<Bytes> {
        let location = Self::location(key)?;
        let started = Instant::now();

        let object = match self.store.get(&location).await {
            Ok(object) => object,
            Err(ObjectStoreError::NotFound { .. }) => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(self.failure(StorageOp::Fetch, key, e)),
        };
        let data = object
            .bytes()
            .await
            .map_err(|e| self.failure(StorageOp::Fetch, key, e))?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = data.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Fetched document from S3"
        );
        Ok(data)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let location = Self::location(key)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(self.failure(StorageOp::Remove, key, e)),
        }
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
