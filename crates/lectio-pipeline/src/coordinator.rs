//! AI fan-out coordinator.
//!
//! Consumes `documents.processing.completed` and requests one summary and one Q&A set
//! per document. Each request is a generation record plus an outbox row written in one
//! transaction, so a redelivered completion event never creates a second request.

use std::sync::Arc;

use async_trait::async_trait;
use lectio_core::events::{
    DocumentProcessingCompleted, Envelope, QaGenerationRequested, SummarizationRequested,
};
use lectio_core::models::{QaRecord, SummaryRecord};
use lectio_core::{AppError, TaskError, TaskResultExt};
use lectio_db::{CreateOutcome, GenerationRepositoryTrait, OutboxMessage};
use lectio_worker::MessageHandler;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Created { record_id: Uuid },
    AlreadyExists { existing_id: Uuid },
}

impl RequestOutcome {
    pub fn record_id(&self) -> Uuid {
        match self {
            RequestOutcome::Created { record_id } => *record_id,
            RequestOutcome::AlreadyExists { existing_id } => *existing_id,
        }
    }
}

#[derive(Clone)]
pub struct AiCoordinator {
    generations: Arc<dyn GenerationRepositoryTrait>,
    desired_question_count: u32,
    min_content_length: usize,
}

impl AiCoordinator {
    pub fn new(
        generations: Arc<dyn GenerationRepositoryTrait>,
        desired_question_count: u32,
        min_content_length: usize,
    ) -> Self {
        Self {
            generations,
            desired_question_count,
            min_content_length,
        }
    }

    /// Requests both generations for a completed document, unless its text is too short.
    ///
    /// Returns `None` when the text was too short. The two requests are independent; the
    /// first error is returned after both have been attempted.
    #[tracing::instrument(skip(self, event), fields(document_id = %event.document_id))]
    pub async fn on_document_completed(
        &self,
        event: &DocumentProcessingCompleted,
    ) -> Result<Option<(RequestOutcome, RequestOutcome)>, AppError> {
        let content_length = event.extracted_text.trim().chars().count();
        if content_length < self.min_content_length {
            tracing::warn!(
                content_length,
                min_content_length = self.min_content_length,
                "Document text too short for AI processing, skipping"
            );
            return Ok(None);
        }

        let (summary, qa) = tokio::join!(
            self.request_summarization(event),
            self.request_qa_generation(event)
        );
        let summary = summary.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to request summarization");
        });
        let qa = qa.inspect_err(|e| {
            tracing::error!(error = %e, "Failed to request Q&A generation");
        });

        Ok(Some((summary?, qa?)))
    }

    /// Creates the summary record and its request event, or reports the existing one.
    #[tracing::instrument(skip(self, source), fields(document_id = %source.document_id))]
    pub async fn request_summarization(
        &self,
        source: &DocumentProcessingCompleted,
    ) -> Result<RequestOutcome, AppError> {
        if let Some(existing) = self
            .generations
            .find_summary_by_document(source.document_id)
            .await?
        {
            tracing::info!(summary_id = %existing.id, "Summary already requested");
            return Ok(RequestOutcome::AlreadyExists {
                existing_id: existing.id,
            });
        }

        let record = SummaryRecord::requested(source.document_id, source.owner_id);
        let event = SummarizationRequested::for_record(source, record.id);
        let message = OutboxMessage::from_event(&event)?;

        match self
            .generations
            .create_summary_with_outbox(&record, &message)
            .await?
        {
            CreateOutcome::Created => {
                tracing::info!(summary_id = %record.id, "Summarization requested");
                Ok(RequestOutcome::Created {
                    record_id: record.id,
                })
            }
            CreateOutcome::AlreadyExists { existing_id } => {
                tracing::info!(summary_id = %existing_id, "Summary requested concurrently");
                Ok(RequestOutcome::AlreadyExists { existing_id })
            }
        }
    }

    /// Creates the Q&A record and its request event, or reports the existing one.
    #[tracing::instrument(skip(self, source), fields(document_id = %source.document_id))]
    pub async fn request_qa_generation(
        &self,
        source: &DocumentProcessingCompleted,
    ) -> Result<RequestOutcome, AppError> {
        if let Some(existing) = self.generations.find_qa_by_document(source.document_id).await? {
            tracing::info!(qa_id = %existing.id, "Q&A already requested");
            return Ok(RequestOutcome::AlreadyExists {
                existing_id: existing.id,
            });
        }

        let record = QaRecord::requested(source.document_id, source.owner_id);
        let event = QaGenerationRequested::for_record(source, record.id, self.desired_question_count);
        let message = OutboxMessage::from_event(&event)?;

        match self.generations.create_qa_with_outbox(&record, &message).await? {
            CreateOutcome::Created => {
                tracing::info!(
                    qa_id = %record.id,
                    desired_question_count = self.desired_question_count,
                    "Q&A generation requested"
                );
                Ok(RequestOutcome::Created {
                    record_id: record.id,
                })
            }
            CreateOutcome::AlreadyExists { existing_id } => {
                tracing::info!(qa_id = %existing_id, "Q&A requested concurrently");
                Ok(RequestOutcome::AlreadyExists { existing_id })
            }
        }
    }
}

#[async_trait]
impl MessageHandler for AiCoordinator {
    fn name(&self) -> &'static str {
        "coordinator"
    }

    async fn handle(
        &self,
        envelope: &Envelope,
        _cancel: CancellationToken,
    ) -> Result<(), TaskError> {
        let event: DocumentProcessingCompleted = envelope.decode().unrecoverable()?;
        self.on_document_completed(&event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectio_core::events::topics;
    use lectio_core::models::Document;
    use lectio_db::InMemoryStore;

    fn completed(text: &str) -> DocumentProcessingCompleted {
        let mut doc = Document::uploaded(
            Uuid::new_v4(),
            "cells.txt",
            "text/plain",
            text.len() as i64,
            "documents/x/cells.txt",
        );
        doc.extracted_text = Some(text.to_string());
        doc.language_detected = Some("en".to_string());
        DocumentProcessingCompleted::from(&doc)
    }

    fn coordinator(store: &InMemoryStore) -> AiCoordinator {
        AiCoordinator::new(Arc::new(store.clone()), 5, 100)
    }

    #[tokio::test]
    async fn requests_both_generations() {
        let store = InMemoryStore::new();
        let event = completed(&"Cells divide by mitosis. ".repeat(10));

        let (summary, qa) = coordinator(&store)
            .on_document_completed(&event)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(summary, RequestOutcome::Created { .. }));
        assert!(matches!(qa, RequestOutcome::Created { .. }));

        let rows = store.outbox_messages().await;
        assert_eq!(rows.len(), 2);
        let qa_row = rows
            .iter()
            .find(|r| r.topic == topics::QA_REQUESTED)
            .unwrap();
        assert_eq!(qa_row.payload["desiredQuestionCount"], 5);
        assert_eq!(qa_row.payload["qaRecordId"], qa.record_id().to_string());
    }

    #[tokio::test]
    async fn short_text_is_skipped() {
        let store = InMemoryStore::new();
        let event = completed("   too short   ");

        let outcome = coordinator(&store).on_document_completed(&event).await.unwrap();

        assert!(outcome.is_none());
        assert_eq!(store.summary_count().await, 0);
        assert!(store.outbox_messages().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_requests_reuse_existing_record() {
        let store = InMemoryStore::new();
        let coordinator = coordinator(&store);
        let event = completed(&"Photosynthesis makes sugar. ".repeat(10));

        let first = coordinator.request_summarization(&event).await.unwrap();
        let second = coordinator.request_summarization(&event).await.unwrap();

        assert_eq!(
            second,
            RequestOutcome::AlreadyExists {
                existing_id: first.record_id()
            }
        );
        assert_eq!(store.summary_count().await, 1);
        assert_eq!(store.outbox_messages().await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_duplicates_create_one_record() {
        let store = InMemoryStore::new();
        let coordinator = coordinator(&store);
        let event = completed(&"Enzymes speed up reactions. ".repeat(10));

        let (a, b) = tokio::join!(
            coordinator.request_summarization(&event),
            coordinator.request_summarization(&event),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let created: Vec<&RequestOutcome> = [&a, &b]
            .into_iter()
            .filter(|o| matches!(o, RequestOutcome::Created { .. }))
            .collect();
        assert_eq!(created.len(), 1);
        assert_eq!(a.record_id(), b.record_id());
        assert_eq!(store.summary_count().await, 1);
        assert_eq!(store.outbox_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn undecodable_payload_is_unrecoverable() {
        let store = InMemoryStore::new();
        let mut envelope = Envelope::wrap(&completed("text")).unwrap();
        envelope.payload = serde_json::json!({"schemaVersion": 1, "documentId": "nope"});

        let err = coordinator(&store)
            .handle(&envelope, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }
}
