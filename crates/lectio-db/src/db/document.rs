use lectio_core::models::{Document, DocumentStatus};
use lectio_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::outbox::{insert_in_tx, OutboxMessage};

/// Trait for document persistence.
///
/// Status changes go through [`DocumentRepositoryTrait::save_transition`], which only
/// writes when the stored status still equals `expected`. A `false` return means another
/// writer moved the document first.
#[async_trait::async_trait]
pub trait DocumentRepositoryTrait: Send + Sync {
    async fn insert(&self, document: &Document) -> Result<(), AppError>;

    /// Inserts the document and its ingestion request in one transaction.
    async fn insert_with_outbox(
        &self,
        document: &Document,
        message: &OutboxMessage,
    ) -> Result<(), AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, AppError>;

    async fn save_transition(
        &self,
        document: &Document,
        expected: DocumentStatus,
    ) -> Result<bool, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;
}

const DOCUMENT_COLUMNS: &str = r#"
    id, owner_id, original_filename, mime_type, file_size, storage_path, status,
    extracted_text, page_count, language_detected, content_hash, processing_error,
    created_at, updated_at, processed_at
"#;

fn insert_query(document: &Document) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(
        r#"
        INSERT INTO documents (
            id, owner_id, original_filename, mime_type, file_size, storage_path, status,
            created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(document.id)
    .bind(document.owner_id)
    .bind(&document.original_filename)
    .bind(&document.mime_type)
    .bind(document.file_size)
    .bind(&document.storage_path)
    .bind(document.status.to_string())
    .bind(document.created_at)
    .bind(document.updated_at)
}

#[derive(Clone)]
pub struct PostgresDocumentRepository {
    pool: PgPool,
}

impl PostgresDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DocumentRepositoryTrait for PostgresDocumentRepository {
    #[tracing::instrument(skip(self, document), fields(document_id = %document.id))]
    async fn insert(&self, document: &Document) -> Result<(), AppError> {
        insert_query(document)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, document_id = %document.id, "Failed to insert document");
                AppError::Database(e)
            })?;

        Ok(())
    }

    #[tracing::instrument(skip(self, document, message), fields(document_id = %document.id, topic = %message.topic))]
    async fn insert_with_outbox(
        &self,
        document: &Document,
        message: &OutboxMessage,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        insert_query(document)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, document_id = %document.id, "Failed to insert document");
                AppError::Database(e)
            })?;
        insert_in_tx(&mut tx, message).await.map_err(|e| {
            tracing::error!(error = %e, topic = %message.topic, "Failed to write outbox row");
            AppError::Database(e)
        })?;
        tx.commit().await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, AppError> {
        let query = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
        let document = sqlx::query_as::<Postgres, Document>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(document)
    }

    #[tracing::instrument(skip(self, document), fields(document_id = %document.id, to = %document.status))]
    async fn save_transition(
        &self,
        document: &Document,
        expected: DocumentStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = $2,
                extracted_text = $3,
                page_count = $4,
                language_detected = $5,
                content_hash = $6,
                processing_error = $7,
                updated_at = $8,
                processed_at = $9
            WHERE id = $1 AND status = $10
            "#,
        )
        .bind(document.id)
        .bind(document.status.to_string())
        .bind(&document.extracted_text)
        .bind(document.page_count)
        .bind(&document.language_detected)
        .bind(&document.content_hash)
        .bind(&document.processing_error)
        .bind(document.updated_at)
        .bind(document.processed_at)
        .bind(expected.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, document_id = %document.id, "Failed to update document");
            AppError::Database(e)
        })?;

        let applied = result.rows_affected() == 1;
        if !applied {
            tracing::warn!(
                document_id = %document.id,
                expected = %expected,
                "Document status changed concurrently, update skipped"
            );
        }
        Ok(applied)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
