//! Summarization and Q&A generation stages.
//!
//! Both stages share one shape: dedup on the stored record, check the language, call
//! the backend under a deadline, move the record to a terminal status and publish
//! exactly one completion event.

mod parse;
mod qa;
mod summarization;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use lectio_core::events::{Envelope, EventSchema};
use lectio_core::models::GenerationStatus;
use lectio_core::{language_code, AppError, ErrorMetadata, LanguageModels, LogLevel};
use lectio_infra::MessageBroker;
use lectio_services::BackendError;
use tokio_util::sync::CancellationToken;

use crate::deadline::with_deadline;

pub use parse::{
    build_prompt, classify_question, confidence_from_score, difficulty_for, parse_questions,
    MAX_QUESTIONS,
};
pub use qa::QaGenerationStage;
pub use summarization::SummarizationStage;

/// Error message carried by the completion event when the record is gone.
pub const RECORD_NOT_FOUND: &str = "generation record not found";

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed,
    Failed { error: String },
    /// The record was already terminal; nothing was published.
    Duplicate { status: GenerationStatus },
    /// No record existed; a failure event was published.
    MissingRecord,
}

/// Language code for a request, rejected unless it is in the supported set.
pub(crate) fn supported_language(
    models: &LanguageModels,
    tag: Option<&str>,
) -> Result<String, AppError> {
    let code = language_code(tag);
    if models.is_supported(&code) {
        Ok(code)
    } else {
        Err(AppError::UnsupportedLanguage(code))
    }
}

pub(crate) fn backend_error(e: BackendError) -> AppError {
    AppError::Backend(e.to_string())
}

/// Runs a backend call under `timeout`, abandoning it if `cancel` fires first.
pub(crate) async fn call_backend<T, F>(
    operation: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> Result<T, AppError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled(format!("{} interrupted by shutdown", operation))),
        result = with_deadline(operation, timeout, async { call.await.map_err(backend_error) }) => result,
    }
}

/// Logs an interrupted generation and hands its error back to the caller unchanged.
pub(crate) fn left_for_redelivery(stage: &'static str, error: AppError) -> AppError {
    tracing::warn!(stage, error = %error, "Generation interrupted, record left for redelivery");
    error
}

/// Publishes a completion event. Failures are logged; the record is already terminal
/// and is not rolled back.
pub(crate) async fn publish_completion<E: EventSchema>(
    broker: &Arc<dyn MessageBroker>,
    event: &E,
) -> bool {
    let envelope = match Envelope::wrap(event) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(topic = E::TOPIC, error = %e, "Failed to encode completion event");
            return false;
        }
    };
    match broker.publish(envelope).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(topic = E::TOPIC, error = %e, "Failed to publish completion event");
            false
        }
    }
}

/// Logs a handled generation failure at the level the error asks for.
pub(crate) fn log_failure(stage: &'static str, error: &AppError) {
    let class = error.class_name();
    match error.log_level() {
        LogLevel::Debug => tracing::debug!(stage, error = %error, error_class = class, "Generation failed"),
        LogLevel::Warn => tracing::warn!(stage, error = %error, error_class = class, "Generation failed"),
        LogLevel::Error => tracing::error!(stage, error = %error, error_class = class, "Generation failed"),
    }
}

pub(crate) fn elapsed_ms(started: std::time::Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
