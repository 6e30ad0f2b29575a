//! Pipeline error type.
//!
//! All pipeline-level failures are unified under [`AppError`]. Collaborator crates keep
//! their own narrow error enums (storage, extraction, page counting, backend) and convert
//! into `AppError` or `anyhow::Error` at the stage boundary.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

use crate::models::TransitionError;

/// Level a stage logs an error at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

/// Self-description of an error: how it is reported and whether it may be retried.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "DATABASE_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether this error is recoverable (redelivery may succeed)
    fn is_recoverable(&self) -> bool;

    /// Message suitable for completion events and processing logs
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Generation backend error: {0}")]
    Backend(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::InternalWithSource {
            message: format!("I/O failure: {}", err),
            source: err.into(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidInput(format!("UUID parsing error: {}", err))
    }
}

/// Static metadata for each variant: (error_code, recoverable, log_level).
fn app_error_static_metadata(err: &AppError) -> (&'static str, bool, LogLevel) {
    match err {
        AppError::Database(_) => ("DATABASE_ERROR", true, LogLevel::Error),
        AppError::Storage(_) => ("STORAGE_ERROR", true, LogLevel::Error),
        AppError::InvalidInput(_) => ("INVALID_INPUT", false, LogLevel::Debug),
        AppError::NotFound(_) => ("NOT_FOUND", false, LogLevel::Debug),
        AppError::InvalidTransition(_) => ("INVALID_TRANSITION", false, LogLevel::Warn),
        AppError::UnsupportedLanguage(_) => ("UNSUPPORTED_LANGUAGE", false, LogLevel::Warn),
        AppError::Timeout { .. } => ("TIMEOUT", true, LogLevel::Warn),
        AppError::Cancelled(_) => ("CANCELLED", true, LogLevel::Warn),
        AppError::Backend(_) => ("BACKEND_ERROR", true, LogLevel::Error),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => {
            ("INTERNAL_ERROR", true, LogLevel::Error)
        }
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).1
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Database(_) => "A database error occurred".to_string(),
            AppError::InternalWithSource { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).2
    }
}

impl AppError {
    /// Short variant name, recorded as `errorClass` in processing logs.
    pub fn class_name(&self) -> &'static str {
        match self {
            AppError::Database(_) => "Database",
            AppError::Storage(_) => "Storage",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::NotFound(_) => "NotFound",
            AppError::InvalidTransition(_) => "InvalidTransition",
            AppError::UnsupportedLanguage(_) => "UnsupportedLanguage",
            AppError::Timeout { .. } => "Timeout",
            AppError::Cancelled(_) => "Cancelled",
            AppError::Backend(_) => "Backend",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "Internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;

    #[test]
    fn transition_error_is_not_recoverable() {
        let err: AppError = DocumentStatus::Completed
            .start_processing()
            .unwrap_err()
            .into();
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
        assert!(!err.is_recoverable());
        assert!(err.client_message().contains("COMPLETED"));
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = AppError::Timeout {
            operation: "text extraction".to_string(),
            seconds: 30,
        };
        assert_eq!(err.to_string(), "text extraction timed out after 30s");
        assert!(err.is_recoverable());
        assert_eq!(err.class_name(), "Timeout");
    }

    #[test]
    fn anyhow_conversion_keeps_message() {
        let err: AppError = anyhow::anyhow!("disk on fire").into();
        assert_eq!(err.client_message(), "disk on fire");
        assert_eq!(err.log_level(), LogLevel::Error);
    }
}
