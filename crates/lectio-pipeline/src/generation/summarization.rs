use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lectio_core::events::{Envelope, SummarizationCompleted, SummarizationRequested};
use lectio_core::models::{GenerationStatus, SummaryOutcome, SummaryRecord};
use lectio_core::{AppError, LanguageModels, TaskError, TaskResultExt};
use lectio_db::GenerationRepositoryTrait;
use lectio_infra::MessageBroker;
use lectio_services::GenerationBackend;
use lectio_worker::MessageHandler;
use tokio_util::sync::CancellationToken;

use super::{
    call_backend, elapsed_ms, left_for_redelivery, log_failure, publish_completion,
    supported_language, GenerationOutcome, RECORD_NOT_FOUND,
};

#[derive(Clone)]
pub struct SummarizationStage {
    generations: Arc<dyn GenerationRepositoryTrait>,
    backend: Arc<dyn GenerationBackend>,
    broker: Arc<dyn MessageBroker>,
    models: LanguageModels,
    backend_timeout: Duration,
}

impl SummarizationStage {
    pub fn new(
        generations: Arc<dyn GenerationRepositoryTrait>,
        backend: Arc<dyn GenerationBackend>,
        broker: Arc<dyn MessageBroker>,
        models: LanguageModels,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            generations,
            backend,
            broker,
            models,
            backend_timeout,
        }
    }

    async fn load_record(
        &self,
        request: &SummarizationRequested,
    ) -> Result<Option<SummaryRecord>, AppError> {
        match self.generations.find_summary(request.summary_record_id).await? {
            Some(record) => Ok(Some(record)),
            None => {
                self.generations
                    .find_summary_by_document(request.document_id)
                    .await
            }
        }
    }

    /// Summarizes one requested document and publishes `summarization.completed`.
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(document_id = %request.document_id, summary_id = %request.summary_record_id)
    )]
    pub async fn process(
        &self,
        request: &SummarizationRequested,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, AppError> {
        let started = Instant::now();

        let record = match self.load_record(request).await? {
            Some(record) => record,
            None => {
                tracing::error!("Summary record not found");
                let event = SummarizationCompleted::failed(request, RECORD_NOT_FOUND, 0);
                publish_completion(&self.broker, &event).await;
                return Ok(GenerationOutcome::MissingRecord);
            }
        };
        if record.status.is_terminal() {
            tracing::info!(status = %record.status, "Summary already processed, skipping");
            return Ok(GenerationOutcome::Duplicate {
                status: record.status,
            });
        }

        let request = SummarizationRequested {
            summary_record_id: record.id,
            ..request.clone()
        };

        tracing::info!(
            text_length = request.extracted_text.chars().count(),
            backend = self.backend.name(),
            "Starting summarization"
        );

        match self.summarize(&request, started, cancel).await {
            Ok(outcome) => self.complete(record, &request, outcome).await,
            Err(e @ AppError::Cancelled(_)) => Err(left_for_redelivery("summarization", e)),
            Err(e) => self.fail(record, &request, e, started).await,
        }
    }

    async fn summarize(
        &self,
        request: &SummarizationRequested,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<SummaryOutcome, AppError> {
        let language = supported_language(&self.models, request.language_detected.as_deref())?;

        let original_length = request.extracted_text.chars().count();
        if original_length == 0 {
            return Err(AppError::InvalidInput("document text is empty".to_string()));
        }

        let generated = call_backend(
            "summarization",
            self.backend_timeout,
            cancel,
            self.backend.summarize(&request.extracted_text, &language),
        )
        .await?;

        let summary_length = generated.text.chars().count();
        Ok(SummaryOutcome {
            summary_text: generated.text,
            model_used: generated.model,
            summary_length: summary_length as i32,
            original_text_length: original_length as i32,
            compression_ratio: summary_length as f64 / original_length as f64,
            processing_time_ms: elapsed_ms(started),
        })
    }

    async fn complete(
        &self,
        record: SummaryRecord,
        request: &SummarizationRequested,
        outcome: SummaryOutcome,
    ) -> Result<GenerationOutcome, AppError> {
        let mut updated = record;
        updated.complete(outcome.clone())?;
        if !self
            .generations
            .save_summary(&updated, GenerationStatus::Requested)
            .await?
        {
            return self.lost_race(request).await;
        }

        tracing::info!(
            model = %outcome.model_used,
            summary_length = outcome.summary_length,
            compression_ratio = outcome.compression_ratio,
            processing_time_ms = outcome.processing_time_ms,
            "Summarization completed"
        );
        let event = SummarizationCompleted::succeeded(request, &outcome);
        publish_completion(&self.broker, &event).await;
        Ok(GenerationOutcome::Completed)
    }

    async fn fail(
        &self,
        record: SummaryRecord,
        request: &SummarizationRequested,
        error: AppError,
        started: Instant,
    ) -> Result<GenerationOutcome, AppError> {
        let message = error.to_string();
        let processing_time_ms = elapsed_ms(started);
        log_failure("summarization", &error);

        let mut updated = record;
        updated.fail(message.clone(), processing_time_ms)?;
        if !self
            .generations
            .save_summary(&updated, GenerationStatus::Requested)
            .await?
        {
            return self.lost_race(request).await;
        }

        let event = SummarizationCompleted::failed(request, message.clone(), processing_time_ms);
        publish_completion(&self.broker, &event).await;
        Ok(GenerationOutcome::Failed { error: message })
    }

    /// Another delivery finished the record first; it owns the completion event.
    async fn lost_race(
        &self,
        request: &SummarizationRequested,
    ) -> Result<GenerationOutcome, AppError> {
        let status = self
            .generations
            .find_summary(request.summary_record_id)
            .await?
            .map(|r| r.status)
            .unwrap_or(GenerationStatus::Failed);
        tracing::warn!(status = %status, "Summary record finished concurrently");
        Ok(GenerationOutcome::Duplicate { status })
    }
}

#[async_trait]
impl MessageHandler for SummarizationStage {
    fn name(&self) -> &'static str {
        "summarization"
    }

    async fn handle(&self, envelope: &Envelope, cancel: CancellationToken) -> Result<(), TaskError> {
        let request: SummarizationRequested = envelope.decode().unrecoverable()?;
        self.process(&request, &cancel).await?;
        Ok(())
    }
}
