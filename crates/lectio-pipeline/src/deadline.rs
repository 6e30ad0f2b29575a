//! Deadlines around collaborator calls.

use std::future::Future;
use std::time::Duration;

use lectio_core::AppError;

fn timed_out(operation: &str, timeout: Duration) -> AppError {
    AppError::Timeout {
        operation: operation.to_string(),
        seconds: timeout.as_secs(),
    }
}

/// Awaits `future` for at most `timeout`.
pub(crate) async fn with_deadline<T, F>(
    operation: &str,
    timeout: Duration,
    future: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, AppError>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| timed_out(operation, timeout))?
}

/// Runs CPU-bound `work` on the blocking pool for at most `timeout`. On expiry the
/// blocking thread finishes in the background and its result is discarded.
pub(crate) async fn blocking_with_deadline<T, F>(
    operation: &str,
    timeout: Duration,
    work: F,
) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AppError::Internal(format!("{} task failed: {}", operation, e))),
        Err(_) => Err(timed_out(operation, timeout)),
    }
}
