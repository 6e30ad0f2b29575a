//! Document entry points: upload, queries and delete.
//!
//! Documents are never re-ingested in place. A FAILED document keeps its status and
//! error; running the same bytes again means uploading them as a new document.

use std::sync::Arc;

use bytes::Bytes;
use lectio_core::events::DocumentIngestionRequested;
use lectio_core::models::{
    Document, DocumentContent, GenerationStatus, ProcessingLogEntry, QaRecord, SummaryRecord,
    Tag,
};
use lectio_core::AppError;
use lectio_db::{
    DocumentRepositoryTrait, GenerationRepositoryTrait, OutboxMessage, Repositories,
    TagRepositoryTrait,
};
use lectio_storage::Storage;
use uuid::Uuid;

use crate::ingestion::ProcessingLogRecorder;

#[derive(Clone)]
pub struct DocumentService {
    repos: Repositories,
    storage: Arc<dyn Storage>,
    recorder: ProcessingLogRecorder,
}

impl DocumentService {
    pub fn new(repos: Repositories, storage: Arc<dyn Storage>) -> Self {
        let recorder = ProcessingLogRecorder::new(repos.logs.clone());
        Self {
            repos,
            storage,
            recorder,
        }
    }

    /// Stores the bytes, then creates the UPLOADED document together with its ingestion
    /// request. The request reaches the broker through the outbox relay.
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload(
        &self,
        owner_id: Uuid,
        filename: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<Document, AppError> {
        if data.is_empty() {
            return Err(AppError::InvalidInput("File is empty".to_string()));
        }
        if filename.trim().is_empty() {
            return Err(AppError::InvalidInput("Filename is required".to_string()));
        }

        let file_size = data.len() as i64;
        let storage_path = self
            .storage
            .store(owner_id, filename, Bytes::from(data))
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;

        let document = Document::uploaded(owner_id, filename, mime_type, file_size, storage_path);
        let message = OutboxMessage::from_event(&DocumentIngestionRequested::new(document.id))?;
        if let Err(e) = self
            .repos
            .documents
            .insert_with_outbox(&document, &message)
            .await
        {
            self.discard_object(&document.storage_path).await;
            return Err(e);
        }

        tracing::info!(
            document_id = %document.id,
            storage_path = %document.storage_path,
            "Document uploaded"
        );
        Ok(document)
    }

    /// Best effort: the insert error is what the caller sees.
    async fn discard_object(&self, storage_path: &str) {
        match self.storage.remove(storage_path).await {
            Ok(()) => tracing::debug!(storage_path, "Removed object of rejected upload"),
            Err(e) => tracing::warn!(
                error = %e,
                storage_path,
                "Failed to remove object of rejected upload"
            ),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Document, AppError> {
        self.repos
            .documents
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Document {} not found", id)))
    }

    pub async fn content(&self, id: Uuid) -> Result<DocumentContent, AppError> {
        self.get(id).await.map(DocumentContent::from)
    }

    /// Removes the stored object, then the row.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        let document = self.get(id).await?;
        self.storage
            .remove(&document.storage_path)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        if !self.repos.documents.delete(id).await? {
            return Err(AppError::NotFound(format!("Document {} not found", id)));
        }
        tracing::info!(document_id = %id, "Document deleted");
        Ok(())
    }

    pub async fn tags(&self, document_id: Uuid) -> Result<Vec<Tag>, AppError> {
        self.repos.tags.list_by_document(document_id).await
    }

    pub async fn history(&self, document_id: Uuid) -> Result<Vec<ProcessingLogEntry>, AppError> {
        self.recorder.history(document_id).await
    }

    pub async fn recent_errors(&self, hours_back: i64) -> Result<Vec<ProcessingLogEntry>, AppError> {
        self.recorder.errors_in_last_hours(hours_back).await
    }

    pub async fn summary_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<SummaryRecord>, AppError> {
        self.repos.generations.find_summary_by_document(document_id).await
    }

    pub async fn qa_for_document(&self, document_id: Uuid) -> Result<Option<QaRecord>, AppError> {
        self.repos.generations.find_qa_by_document(document_id).await
    }

    pub async fn summaries_by_status(
        &self,
        status: GenerationStatus,
        limit: i64,
    ) -> Result<Vec<SummaryRecord>, AppError> {
        self.repos
            .generations
            .list_summaries_by_status(status, limit)
            .await
    }

    pub async fn qa_by_status(
        &self,
        status: GenerationStatus,
        limit: i64,
    ) -> Result<Vec<QaRecord>, AppError> {
        self.repos.generations.list_qa_by_status(status, limit).await
    }
}
