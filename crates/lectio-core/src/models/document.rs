use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::{DocumentStatus, TransitionError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub storage_path: String,
    pub status: DocumentStatus,
    pub extracted_text: Option<String>,
    pub page_count: Option<i32>,
    pub language_detected: Option<String>,
    pub content_hash: Option<String>,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document {
    /// A freshly stored upload awaiting ingestion.
    pub fn uploaded(
        owner_id: Uuid,
        original_filename: impl Into<String>,
        mime_type: impl Into<String>,
        file_size: i64,
        storage_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            original_filename: original_filename.into(),
            mime_type: mime_type.into(),
            file_size,
            storage_path: storage_path.into(),
            status: DocumentStatus::Uploaded,
            extracted_text: None,
            page_count: None,
            language_detected: None,
            content_hash: None,
            processing_error: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
        }
    }

    pub fn begin_processing(&mut self) -> Result<(), TransitionError> {
        self.status = self.status.start_processing()?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), TransitionError> {
        self.status = self.status.complete()?;
        let now = Utc::now();
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.status = self.status.fail()?;
        self.processing_error = Some(error.into());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn text(&self) -> &str {
        self.extracted_text.as_deref().unwrap_or_default()
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Document {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Document {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            original_filename: row.get("original_filename"),
            mime_type: row.get("mime_type"),
            file_size: row.get("file_size"),
            storage_path: row.get("storage_path"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse document status: {}", e).into())
            })?,
            extracted_text: row.get("extracted_text"),
            page_count: row.get("page_count"),
            language_detected: row.get("language_detected"),
            content_hash: row.get("content_hash"),
            processing_error: row.get("processing_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            processed_at: row.get("processed_at"),
        })
    }
}

/// Text view of a document, as returned by content queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    pub id: Uuid,
    pub original_filename: String,
    pub extracted_text: Option<String>,
    pub status: DocumentStatus,
}

impl From<Document> for DocumentContent {
    fn from(doc: Document) -> Self {
        DocumentContent {
            id: doc.id,
            original_filename: doc.original_filename,
            extracted_text: doc.extracted_text,
            status: doc.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::uploaded(Uuid::new_v4(), "notes.txt", "text/plain", 42, "documents/x")
    }

    #[test]
    fn new_document_is_uploaded() {
        let doc = sample();
        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert!(doc.extracted_text.is_none());
        assert_eq!(doc.text(), "");
    }

    #[test]
    fn completing_stamps_processed_at() {
        let mut doc = sample();
        doc.begin_processing().unwrap();
        doc.mark_completed().unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert!(doc.processed_at.is_some());
    }

    #[test]
    fn failed_document_cannot_complete() {
        let mut doc = sample();
        doc.begin_processing().unwrap();
        doc.mark_failed("extraction failed").unwrap();
        assert!(doc.mark_completed().is_err());
        assert!(doc.begin_processing().is_err());
        assert_eq!(doc.processing_error.as_deref(), Some("extraction failed"));
    }
}
