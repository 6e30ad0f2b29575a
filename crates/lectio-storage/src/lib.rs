//! Document byte storage for Lectio.
//!
//! Uploaded files are written once by the document service and read back by the
//! ingestion stage. Backends: S3 through `object_store`, a local directory, and an
//! in-memory map for tests and single-process runs.
//!
//! Keys look like `documents/{owner_id}/{uuid}_{sanitized filename}` and are produced
//! by [`generate_storage_key`] for every backend.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use factory::create_storage;
pub use keys::generate_storage_key;
pub use lectio_core::StorageBackend;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{Storage, StorageError, StorageOp, StorageResult};
