//! Ingestion stage: drives one UPLOADED document to COMPLETED or FAILED.
//!
//! Steps run in order and each writes exactly one processing log entry:
//! PROCESSING_STARTED, TEXT_EXTRACTION, DOCUMENT_HASH, LANGUAGE_DETECTION, PAGE_COUNT,
//! AUTO_TAGGING, PROCESSING_COMPLETED. A failure writes the failing step as ERROR
//! followed by PROCESSING_FAILED, and no completion event is published.
//!
//! If the FAILED status cannot be saved, the request is redelivered. A redelivery that
//! finds the document PROCESSING with PROCESSING_FAILED as its last entry saves the
//! failure without running any step again.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use lectio_core::events::{DocumentIngestionRequested, Envelope};
use lectio_core::models::{Document, DocumentStatus, ProcessingStep, StepStatus, Tag};
use lectio_core::{AppError, TaskError, TaskResultExt};
use lectio_db::{DocumentRepositoryTrait, TagRepositoryTrait};
use lectio_processing::{
    content_hash, generate_tags, LanguageDetection, PageCount, PageCountInput,
    UNKNOWN_LANGUAGE,
};
use lectio_worker::MessageHandler;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::log_recorder::ProcessingLogRecorder;
use super::publisher::CompletionPublisher;
use crate::app::Collaborators;
use crate::deadline::{blocking_with_deadline, with_deadline};

/// Attempts at saving FAILED before the request is handed back for redelivery.
const FAIL_SAVE_ATTEMPTS: u32 = 3;
const FAIL_SAVE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
pub enum IngestionOutcome {
    Completed { published: bool },
    Failed { error: String },
    /// The document was not UPLOADED; nothing was changed.
    Skipped { status: DocumentStatus },
}

/// A step failure: the step it happened in, if any, and what to record.
struct StepFailure {
    step: Option<ProcessingStep>,
    message: String,
    class: &'static str,
}

impl StepFailure {
    fn in_step(step: ProcessingStep, error: AppError) -> Self {
        Self {
            step: Some(step),
            message: error.to_string(),
            class: error.class_name(),
        }
    }
}

#[derive(Clone)]
pub struct IngestionStage {
    documents: Arc<dyn DocumentRepositoryTrait>,
    tags: Arc<dyn TagRepositoryTrait>,
    recorder: ProcessingLogRecorder,
    publisher: CompletionPublisher,
    collaborators: Collaborators,
    collaborator_timeout: Duration,
}

impl IngestionStage {
    pub fn new(
        documents: Arc<dyn DocumentRepositoryTrait>,
        tags: Arc<dyn TagRepositoryTrait>,
        recorder: ProcessingLogRecorder,
        publisher: CompletionPublisher,
        collaborators: Collaborators,
        collaborator_timeout: Duration,
    ) -> Self {
        Self {
            documents,
            tags,
            recorder,
            publisher,
            collaborators,
            collaborator_timeout,
        }
    }

    /// Processes an UPLOADED document. Documents in any other status are left alone.
    ///
    /// Errors are returned only when the outcome itself could not be persisted.
    #[tracing::instrument(skip(self))]
    pub async fn process(&self, document_id: Uuid) -> Result<IngestionOutcome, AppError> {
        let started = Instant::now();

        let mut document = self
            .documents
            .find_by_id(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {} not found", document_id)))?;

        if document.status == DocumentStatus::Processing {
            if let Some(message) = self.unsaved_failure(document_id).await? {
                return self.finish_failure(document, message).await;
            }
        }
        if let Err(e) = document.begin_processing() {
            tracing::warn!(error = %e, "Document is not awaiting ingestion, skipping");
            return Ok(IngestionOutcome::Skipped {
                status: document.status,
            });
        }
        if !self
            .documents
            .save_transition(&document, DocumentStatus::Uploaded)
            .await?
        {
            let current = self
                .documents
                .find_by_id(document_id)
                .await?
                .map(|d| d.status)
                .unwrap_or(DocumentStatus::Uploaded);
            tracing::warn!(status = %current, "Document was claimed by another worker, skipping");
            return Ok(IngestionOutcome::Skipped { status: current });
        }

        tracing::info!(
            filename = %document.original_filename,
            mime_type = %document.mime_type,
            file_size = document.file_size,
            "Starting document processing"
        );
        self.recorder
            .record(
                document.id,
                ProcessingStep::ProcessingStarted,
                StepStatus::Success,
                json!({ "originalFilename": document.original_filename }),
                None,
            )
            .await;

        match self.run_steps(&mut document, started).await {
            Ok(published) => Ok(IngestionOutcome::Completed { published }),
            Err(failure) => self.fail(document, failure, started).await,
        }
    }

    async fn run_steps(
        &self,
        document: &mut Document,
        started: Instant,
    ) -> Result<bool, StepFailure> {
        let bytes = self.extract_text(document).await?;
        self.hash(document).await;
        self.detect_language(document).await;
        self.count_pages(document, bytes).await;
        self.tag(document).await?;
        self.complete(document, started).await
    }

    async fn extract_text(&self, document: &mut Document) -> Result<Bytes, StepFailure> {
        let step_started = Instant::now();

        let bytes = match self.fetch_and_extract(document).await {
            Ok((bytes, text)) => {
                document.extracted_text = Some(text);
                bytes
            }
            Err((message, class)) => {
                self.recorder
                    .record(
                        document.id,
                        ProcessingStep::TextExtraction,
                        StepStatus::Error,
                        json!({ "errorMessage": message, "errorClass": class }),
                        Some(step_started.elapsed()),
                    )
                    .await;
                // already logged above
                return Err(StepFailure {
                    step: None,
                    message,
                    class,
                });
            }
        };

        let text_length = document.text().chars().count();
        tracing::info!(text_length, "Text extracted");
        self.recorder
            .record(
                document.id,
                ProcessingStep::TextExtraction,
                StepStatus::Success,
                json!({ "textLength": text_length }),
                Some(step_started.elapsed()),
            )
            .await;
        Ok(bytes)
    }

    /// Downloads the stored bytes and extracts their text, reporting failures as
    /// `(message, class)`.
    async fn fetch_and_extract(
        &self,
        document: &Document,
    ) -> Result<(Bytes, String), (String, &'static str)> {
        let storage = self.collaborators.storage.clone();
        let path = document.storage_path.clone();
        let bytes = with_deadline("storage fetch", self.collaborator_timeout, async move {
            storage
                .fetch(&path)
                .await
                .map_err(|e| AppError::Storage(e.to_string()))
        })
        .await
        .map_err(|e| (e.to_string(), e.class_name()))?;

        let extractor = self.collaborators.extractor.clone();
        let mime_type = document.mime_type.clone();
        let input = bytes.clone();
        let extracted = blocking_with_deadline("text extraction", self.collaborator_timeout, move || {
            extractor.extract(&mime_type, &input)
        })
        .await
        .map_err(|e| (e.to_string(), e.class_name()))?;

        match extracted {
            Ok(text) => Ok((bytes, text)),
            Err(e) => {
                tracing::error!(error = %e, "Text extraction failed");
                Err((e.to_string(), e.class_name()))
            }
        }
    }

    async fn hash(&self, document: &mut Document) {
        let step_started = Instant::now();
        let hash = content_hash(&document.original_filename, document.text());
        let text_length = document.text().chars().count();
        self.recorder
            .record(
                document.id,
                ProcessingStep::DocumentHash,
                StepStatus::Success,
                json!({ "textLength": text_length, "hash": hash }),
                Some(step_started.elapsed()),
            )
            .await;
        document.content_hash = Some(hash);
    }

    async fn detect_language(&self, document: &mut Document) {
        let step_started = Instant::now();
        let detector = self.collaborators.detector.clone();
        let text = document.text().to_string();
        let text_length = text.chars().count();

        let result = blocking_with_deadline("language detection", self.collaborator_timeout, move || {
            detector.detect(&text)
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Language detection unavailable");
            LanguageDetection::unknown(e.to_string())
        });

        let status = if result.is_reliable() {
            tracing::info!(
                language = %result.language,
                confidence = result.confidence,
                "Language detected"
            );
            StepStatus::Success
        } else if result.is_unknown() {
            tracing::warn!(reason = ?result.reason, "Could not detect language");
            StepStatus::Warning
        } else {
            tracing::warn!(
                language = %result.language,
                confidence = result.confidence,
                "Low confidence language detection"
            );
            StepStatus::Warning
        };

        let mut details = json!({
            "detectedLanguage": result.language,
            "confidence": result.confidence,
            "reliable": result.is_reliable(),
            "textLength": text_length,
        });
        if let Some(reason) = &result.reason {
            details["reason"] = json!(reason);
        }
        self.recorder
            .record(
                document.id,
                ProcessingStep::LanguageDetection,
                status,
                details,
                Some(step_started.elapsed()),
            )
            .await;

        document.language_detected = Some(if result.language.is_empty() {
            UNKNOWN_LANGUAGE.to_string()
        } else {
            result.language
        });
    }

    async fn count_pages(&self, document: &mut Document, bytes: Bytes) {
        let step_started = Instant::now();
        let counter = self.collaborators.page_counter.clone();
        let mime_type = document.mime_type.clone();
        let file_size = document.file_size;
        let text = document.text().to_string();

        let counted = blocking_with_deadline("page count", self.collaborator_timeout, move || {
            counter
                .count(&PageCountInput {
                    mime_type: &mime_type,
                    data: &bytes,
                    file_size,
                    text: &text,
                })
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r);

        let result = match counted {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Page count failed, treating type as unsupported");
                let mut unsupported = PageCount::unsupported(document.mime_type.to_lowercase());
                unsupported.details = Some(e);
                unsupported
            }
        };

        let status = if result.is_supported() {
            StepStatus::Success
        } else {
            StepStatus::Warning
        };
        let mut details = json!({
            "pageCount": result.count,
            "method": result.method.to_string(),
            "fileType": result.file_type,
        });
        if let Some(extra) = &result.details {
            details["details"] = json!(extra);
        }
        tracing::info!(
            page_count = ?result.count,
            method = %result.method,
            "Pages counted"
        );
        self.recorder
            .record(
                document.id,
                ProcessingStep::PageCount,
                status,
                details,
                Some(step_started.elapsed()),
            )
            .await;

        document.page_count = result.count;
    }

    async fn tag(&self, document: &Document) -> Result<(), StepFailure> {
        let step_started = Instant::now();
        let tags: Vec<Tag> = generate_tags(document.text(), &document.mime_type)
            .into_iter()
            .map(|s| Tag::new(document.id, s.label, s.confidence))
            .collect();

        self.tags
            .insert_many(&tags)
            .await
            .map_err(|e| StepFailure::in_step(ProcessingStep::AutoTagging, e))?;

        tracing::debug!(tags_generated = tags.len(), "Tags generated");
        self.recorder
            .record(
                document.id,
                ProcessingStep::AutoTagging,
                StepStatus::Success,
                json!({ "tagsGenerated": tags.len() }),
                Some(step_started.elapsed()),
            )
            .await;
        Ok(())
    }

    async fn complete(&self, document: &mut Document, started: Instant) -> Result<bool, StepFailure> {
        let mut completed = document.clone();
        completed
            .mark_completed()
            .map_err(|e| StepFailure::in_step(ProcessingStep::ProcessingCompleted, e.into()))?;

        let saved = self
            .documents
            .save_transition(&completed, DocumentStatus::Processing)
            .await
            .map_err(|e| StepFailure::in_step(ProcessingStep::ProcessingCompleted, e))?;
        if !saved {
            return Err(StepFailure::in_step(
                ProcessingStep::ProcessingCompleted,
                AppError::Internal("document status changed during processing".to_string()),
            ));
        }
        *document = completed;

        let total = started.elapsed();
        tracing::info!(
            total_processing_time_ms = total.as_millis() as u64,
            "Document processed successfully"
        );
        self.recorder
            .record(
                document.id,
                ProcessingStep::ProcessingCompleted,
                StepStatus::Success,
                json!({ "totalProcessingTimeMs": total.as_millis() as u64 }),
                Some(total),
            )
            .await;

        Ok(self.publisher.publish_completed(document).await)
    }

    async fn fail(
        &self,
        mut document: Document,
        failure: StepFailure,
        started: Instant,
    ) -> Result<IngestionOutcome, AppError> {
        tracing::error!(
            error = %failure.message,
            error_class = failure.class,
            step = ?failure.step,
            "Document processing failed"
        );

        if let Some(step) = failure.step {
            self.recorder
                .record(
                    document.id,
                    step,
                    StepStatus::Error,
                    json!({ "errorMessage": failure.message, "errorClass": failure.class }),
                    None,
                )
                .await;
        }

        let elapsed = started.elapsed();
        if let Err(e) = document.mark_failed(failure.message.clone()) {
            return Err(e.into());
        }
        let persisted = self.save_failed(&document).await;

        self.recorder
            .record(
                document.id,
                ProcessingStep::ProcessingFailed,
                StepStatus::Error,
                json!({ "errorMessage": failure.message, "errorClass": failure.class }),
                Some(elapsed),
            )
            .await;

        persisted.map(|()| IngestionOutcome::Failed {
            error: failure.message,
        })
    }

    /// Saves a FAILED document over its PROCESSING row, retrying storage errors.
    async fn save_failed(&self, document: &Document) -> Result<(), AppError> {
        let mut attempt = 1;
        loop {
            match self
                .documents
                .save_transition(document, DocumentStatus::Processing)
                .await
            {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    return Err(AppError::Internal(format!(
                        "Document {} changed status while being failed",
                        document.id
                    )))
                }
                Err(e) if attempt < FAIL_SAVE_ATTEMPTS => {
                    tracing::warn!(error = %e, attempt, "Failed to persist FAILED status, retrying");
                    tokio::time::sleep(FAIL_SAVE_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "Failed to persist FAILED status");
                    return Err(e);
                }
            }
        }
    }

    /// The error message of a failure that was logged but never saved.
    async fn unsaved_failure(&self, document_id: Uuid) -> Result<Option<String>, AppError> {
        let history = self.recorder.history(document_id).await?;
        Ok(history
            .last()
            .filter(|entry| entry.step == ProcessingStep::ProcessingFailed)
            .map(|entry| {
                entry.details["errorMessage"]
                    .as_str()
                    .unwrap_or("processing failed")
                    .to_string()
            }))
    }

    async fn finish_failure(
        &self,
        mut document: Document,
        message: String,
    ) -> Result<IngestionOutcome, AppError> {
        tracing::warn!(error = %message, "Saving failure left by an earlier delivery");
        document.mark_failed(message.clone())?;
        self.save_failed(&document).await?;
        Ok(IngestionOutcome::Failed { error: message })
    }
}

#[async_trait]
impl MessageHandler for IngestionStage {
    fn name(&self) -> &'static str {
        "ingestion"
    }

    async fn handle(
        &self,
        envelope: &Envelope,
        _cancel: CancellationToken,
    ) -> Result<(), TaskError> {
        let request: DocumentIngestionRequested = envelope.decode().unrecoverable()?;
        let outcome = self.process(request.document_id).await?;
        tracing::debug!(document_id = %request.document_id, outcome = ?outcome, "Ingestion finished");
        Ok(())
    }
}
