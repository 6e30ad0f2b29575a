//! Failure of a stage handler, classified by what the broker should do with the message.

use crate::error::{AppError, ErrorMetadata};

/// Returned by message handlers. A transient failure sends the message back to the
/// broker for another delivery; a permanent one is logged and the message dropped.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Worth another delivery, e.g. the database was unreachable.
    #[error(transparent)]
    Transient(anyhow::Error),

    /// Fails the same way on every delivery, e.g. an undecodable payload.
    #[error(transparent)]
    Permanent(anyhow::Error),
}

impl TaskError {
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Transient(err.into())
    }

    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Permanent(err.into())
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, TaskError::Transient(_))
    }

    pub fn error(&self) -> &anyhow::Error {
        match self {
            TaskError::Transient(e) | TaskError::Permanent(e) => e,
        }
    }
}

/// Untyped errors get the benefit of the doubt.
impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Transient(err)
    }
}

impl From<AppError> for TaskError {
    fn from(err: AppError) -> Self {
        if err.is_recoverable() {
            TaskError::Transient(err.into())
        } else {
            TaskError::Permanent(err.into())
        }
    }
}

pub trait TaskResultExt<T> {
    /// Marks any error as permanent.
    fn unrecoverable(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, TaskError> {
        self.map_err(TaskError::unrecoverable)
    }
}
