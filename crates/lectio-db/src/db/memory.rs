//! In-memory implementations of every repository trait.
//!
//! Used when `DATABASE_URL` is unset and by the pipeline tests. All state lives behind
//! one mutex, so each trait method is atomic, including the check-then-insert in
//! `create_*_with_outbox`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lectio_core::models::{
    Document, DocumentStatus, GenerationStatus, ProcessingLogEntry, QaRecord, StepStatus,
    SummaryRecord, Tag,
};
use lectio_core::AppError;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::document::DocumentRepositoryTrait;
use super::generation::{CreateOutcome, GenerationRepositoryTrait};
use super::outbox::{OutboxMessage, OutboxRepositoryTrait};
use super::processing_log::ProcessingLogRepositoryTrait;
use super::tag::TagRepositoryTrait;

#[derive(Default)]
struct State {
    documents: HashMap<Uuid, Document>,
    logs: Vec<ProcessingLogEntry>,
    tags: Vec<Tag>,
    summaries: HashMap<Uuid, SummaryRecord>,
    qa: HashMap<Uuid, QaRecord>,
    outbox: Vec<OutboxMessage>,
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every outbox row written so far, published or not.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.outbox.clone()
    }

    pub async fn summary_count(&self) -> usize {
        self.state.lock().await.summaries.len()
    }

    pub async fn qa_count(&self) -> usize {
        self.state.lock().await.qa.len()
    }
}

#[async_trait::async_trait]
impl DocumentRepositoryTrait for InMemoryStore {
    async fn insert(&self, document: &Document) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if state.documents.contains_key(&document.id) {
            return Err(AppError::InvalidInput(format!(
                "Document {} already exists",
                document.id
            )));
        }
        state.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn insert_with_outbox(
        &self,
        document: &Document,
        message: &OutboxMessage,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if state.documents.contains_key(&document.id) {
            return Err(AppError::InvalidInput(format!(
                "Document {} already exists",
                document.id
            )));
        }
        state.documents.insert(document.id, document.clone());
        state.outbox.push(message.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, AppError> {
        Ok(self.state.lock().await.documents.get(&id).cloned())
    }

    async fn save_transition(
        &self,
        document: &Document,
        expected: DocumentStatus,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        match state.documents.get_mut(&document.id) {
            Some(stored) if stored.status == expected => {
                *stored = document.clone();
                Ok(true)
            }
            Some(stored) => {
                tracing::warn!(
                    document_id = %document.id,
                    expected = %expected,
                    actual = %stored.status,
                    "Document status changed concurrently, update skipped"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.state.lock().await.documents.remove(&id).is_some())
    }
}

#[async_trait::async_trait]
impl ProcessingLogRepositoryTrait for InMemoryStore {
    async fn append(&self, entry: &ProcessingLogEntry) -> Result<(), AppError> {
        self.state.lock().await.logs.push(entry.clone());
        Ok(())
    }

    async fn list_by_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<ProcessingLogEntry>, AppError> {
        let state = self.state.lock().await;
        let mut entries: Vec<ProcessingLogEntry> = state
            .logs
            .iter()
            .filter(|e| e.document_id == document_id)
            .cloned()
            .collect();
        // stable: equal timestamps keep insertion order
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn errors_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProcessingLogEntry>, AppError> {
        let state = self.state.lock().await;
        let mut entries: Vec<ProcessingLogEntry> = state
            .logs
            .iter()
            .filter(|e| e.status == StepStatus::Error && e.created_at >= since)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}

#[async_trait::async_trait]
impl TagRepositoryTrait for InMemoryStore {
    async fn insert_many(&self, tags: &[Tag]) -> Result<(), AppError> {
        self.state.lock().await.tags.extend_from_slice(tags);
        Ok(())
    }

    async fn list_by_document(&self, document_id: Uuid) -> Result<Vec<Tag>, AppError> {
        let state = self.state.lock().await;
        let mut tags: Vec<Tag> = state
            .tags
            .iter()
            .filter(|t| t.document_id == document_id)
            .cloned()
            .collect();
        tags.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(tags)
    }
}

#[async_trait::async_trait]
impl GenerationRepositoryTrait for InMemoryStore {
    async fn find_summary(&self, id: Uuid) -> Result<Option<SummaryRecord>, AppError> {
        Ok(self.state.lock().await.summaries.get(&id).cloned())
    }

    async fn find_summary_by_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<SummaryRecord>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .summaries
            .values()
            .find(|r| r.document_id == document_id)
            .cloned())
    }

    async fn create_summary_with_outbox(
        &self,
        record: &SummaryRecord,
        message: &OutboxMessage,
    ) -> Result<CreateOutcome, AppError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .summaries
            .values()
            .find(|r| r.document_id == record.document_id)
        {
            return Ok(CreateOutcome::AlreadyExists {
                existing_id: existing.id,
            });
        }
        state.summaries.insert(record.id, record.clone());
        state.outbox.push(message.clone());
        Ok(CreateOutcome::Created)
    }

    async fn save_summary(
        &self,
        record: &SummaryRecord,
        expected: GenerationStatus,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        match state.summaries.get_mut(&record.id) {
            Some(stored) if stored.status == expected => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_summaries_by_status(
        &self,
        status: GenerationStatus,
        limit: i64,
    ) -> Result<Vec<SummaryRecord>, AppError> {
        let state = self.state.lock().await;
        let mut records: Vec<SummaryRecord> = state
            .summaries
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }

    async fn find_qa(&self, id: Uuid) -> Result<Option<QaRecord>, AppError> {
        Ok(self.state.lock().await.qa.get(&id).cloned())
    }

    async fn find_qa_by_document(&self, document_id: Uuid) -> Result<Option<QaRecord>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .qa
            .values()
            .find(|r| r.document_id == document_id)
            .cloned())
    }

    async fn create_qa_with_outbox(
        &self,
        record: &QaRecord,
        message: &OutboxMessage,
    ) -> Result<CreateOutcome, AppError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .qa
            .values()
            .find(|r| r.document_id == record.document_id)
        {
            return Ok(CreateOutcome::AlreadyExists {
                existing_id: existing.id,
            });
        }
        state.qa.insert(record.id, record.clone());
        state.outbox.push(message.clone());
        Ok(CreateOutcome::Created)
    }

    async fn save_qa(
        &self,
        record: &QaRecord,
        expected: GenerationStatus,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock().await;
        match state.qa.get_mut(&record.id) {
            Some(stored) if stored.status == expected => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_qa_by_status(
        &self,
        status: GenerationStatus,
        limit: i64,
    ) -> Result<Vec<QaRecord>, AppError> {
        let state = self.state.lock().await;
        let mut records: Vec<QaRecord> = state
            .qa
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit.max(0) as usize);
        Ok(records)
    }
}

#[async_trait::async_trait]
impl OutboxRepositoryTrait for InMemoryStore {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxMessage>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|m| m.published_at.is_none())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.outbox.iter_mut().find(|m| m.id == id) {
            message.published_at = Some(Utc::now());
            message.attempts += 1;
            message.last_error = None;
        }
        Ok(())
    }

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.outbox.iter_mut().find(|m| m.id == id) {
            message.attempts += 1;
            message.last_error = Some(error.to_string());
        }
        Ok(())
    }
}
