//! The [`Storage`] trait and its error type.

use std::fmt::{Display, Formatter, Result as FmtResult};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::StorageBackend;

/// Which storage operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    Store,
    Fetch,
    Remove,
}

impl Display for StorageOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(match self {
            StorageOp::Store => "store",
            StorageOp::Fetch => "fetch",
            StorageOp::Remove => "remove",
        })
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("No object stored under {0}")]
    NotFound(String),

    #[error("Invalid storage key {0:?}")]
    InvalidKey(String),

    #[error("{backend} {op} of {key} failed: {message}")]
    Backend {
        backend: StorageBackend,
        op: StorageOp,
        key: String,
        message: String,
    },

    #[error("Storage misconfigured: {0}")]
    Config(String),
}

impl StorageError {
    pub(crate) fn backend(
        backend: StorageBackend,
        op: StorageOp,
        key: &str,
        err: impl Display,
    ) -> Self {
        StorageError::Backend {
            backend,
            op,
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Object storage for uploaded document bytes.
///
/// Keys are generated by the store itself (see [`crate::keys`]) and handed back to the
/// caller, who persists them as the document's storage path.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores `data` under a new key for `owner_id` and returns the key.
    async fn store(&self, owner_id: Uuid, filename: &str, data: Bytes) -> StorageResult<String>;

    /// Missing keys are [`StorageError::NotFound`].
    async fn fetch(&self, key: &str) -> StorageResult<Bytes>;

    /// Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    fn backend(&self) -> StorageBackend;
}

/// Rejects keys that could escape the storage root.
pub(crate) fn check_key(key: &str) -> StorageResult<()> {
    let escapes = key.is_empty()
        || key.starts_with('/')
        || key.split(['/', '\\']).any(|segment| segment == "..");
    if escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
