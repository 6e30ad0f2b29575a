//! Lectio Core Library
//!
//! Domain models, status state machines, versioned event schemas, configuration and
//! error types shared by every Lectio crate.

pub mod config;
pub mod error;
pub mod events;
pub mod languages;
pub mod models;
pub mod storage_types;
pub mod task_error;

// Re-export commonly used types
pub use config::{
    BackendConfig, Config, DetectionConfig, GenerationBackendKind, OutboxConfig, StageConfig,
    StorageConfig,
};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use languages::{language_code, LanguageModels};
pub use storage_types::StorageBackend;
pub use task_error::{TaskError, TaskResultExt};
