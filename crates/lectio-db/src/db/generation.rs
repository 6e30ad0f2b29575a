use lectio_core::models::{GenerationStatus, QaRecord, SummaryRecord};
use lectio_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::outbox::{insert_in_tx, OutboxMessage};

/// Result of creating a generation record together with its request event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A record of the same variant already exists for the document. Nothing was written.
    AlreadyExists { existing_id: Uuid },
}

/// Persistence for summary and Q&A records.
///
/// At most one record of each variant exists per document. `create_*_with_outbox`
/// writes the record and the outbox row atomically, or neither.
#[async_trait::async_trait]
pub trait GenerationRepositoryTrait: Send + Sync {
    async fn find_summary(&self, id: Uuid) -> Result<Option<SummaryRecord>, AppError>;

    async fn find_summary_by_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<SummaryRecord>, AppError>;

    async fn create_summary_with_outbox(
        &self,
        record: &SummaryRecord,
        message: &OutboxMessage,
    ) -> Result<CreateOutcome, AppError>;

    /// Compare-and-set on status, see [`super::DocumentRepositoryTrait::save_transition`].
    async fn save_summary(
        &self,
        record: &SummaryRecord,
        expected: GenerationStatus,
    ) -> Result<bool, AppError>;

    async fn list_summaries_by_status(
        &self,
        status: GenerationStatus,
        limit: i64,
    ) -> Result<Vec<SummaryRecord>, AppError>;

    async fn find_qa(&self, id: Uuid) -> Result<Option<QaRecord>, AppError>;

    async fn find_qa_by_document(&self, document_id: Uuid) -> Result<Option<QaRecord>, AppError>;

    async fn create_qa_with_outbox(
        &self,
        record: &QaRecord,
        message: &OutboxMessage,
    ) -> Result<CreateOutcome, AppError>;

    async fn save_qa(&self, record: &QaRecord, expected: GenerationStatus)
        -> Result<bool, AppError>;

    async fn list_qa_by_status(
        &self,
        status: GenerationStatus,
        limit: i64,
    ) -> Result<Vec<QaRecord>, AppError>;
}

const SUMMARY_COLUMNS: &str = r#"
    id, document_id, owner_id, status, summary_text, model_used, summary_length,
    original_text_length, compression_ratio, processing_time_ms, processing_error,
    created_at, updated_at, completed_at
"#;

const QA_COLUMNS: &str = r#"
    id, document_id, owner_id, status, model_used, questions_generated, items,
    processing_time_ms, processing_error, created_at, updated_at, completed_at
"#;

#[derive(Clone)]
pub struct PostgresGenerationRepository {
    pool: PgPool,
}

impl PostgresGenerationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn existing_id(&self, table: &str, document_id: Uuid) -> Result<Uuid, AppError> {
        let query = format!("SELECT id FROM {} WHERE document_id = $1", table);
        let id: Uuid = sqlx::query_scalar(&query)
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }
}

#[async_trait::async_trait]
impl GenerationRepositoryTrait for PostgresGenerationRepository {
    #[tracing::instrument(skip(self))]
    async fn find_summary(&self, id: Uuid) -> Result<Option<SummaryRecord>, AppError> {
        let query = format!("SELECT {} FROM document_summaries WHERE id = $1", SUMMARY_COLUMNS);
        let record = sqlx::query_as::<Postgres, SummaryRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn find_summary_by_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<SummaryRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM document_summaries WHERE document_id = $1",
            SUMMARY_COLUMNS
        );
        let record = sqlx::query_as::<Postgres, SummaryRecord>(&query)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    #[tracing::instrument(skip(self, record, message), fields(document_id = %record.document_id))]
    async fn create_summary_with_outbox(
        &self,
        record: &SummaryRecord,
        message: &OutboxMessage,
    ) -> Result<CreateOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO document_summaries (
                id, document_id, owner_id, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (document_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(record.document_id)
        .bind(record.owner_id)
        .bind(record.status.to_string())
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, document_id = %record.document_id, "Failed to insert summary record");
            AppError::Database(e)
        })?;

        if inserted.is_none() {
            tx.rollback().await?;
            let existing_id = self
                .existing_id("document_summaries", record.document_id)
                .await?;
            return Ok(CreateOutcome::AlreadyExists { existing_id });
        }

        insert_in_tx(&mut tx, message).await.map_err(|e| {
            tracing::error!(error = %e, topic = %message.topic, "Failed to write outbox row");
            AppError::Database(e)
        })?;
        tx.commit().await?;

        Ok(CreateOutcome::Created)
    }

    #[tracing::instrument(skip(self, record), fields(record_id = %record.id, to = %record.status))]
    async fn save_summary(
        &self,
        record: &SummaryRecord,
        expected: GenerationStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE document_summaries
            SET status = $2,
                summary_text = $3,
                model_used = $4,
                summary_length = $5,
                original_text_length = $6,
                compression_ratio = $7,
                processing_time_ms = $8,
                processing_error = $9,
                updated_at = $10,
                completed_at = $11
            WHERE id = $1 AND status = $12
            "#,
        )
        .bind(record.id)
        .bind(record.status.to_string())
        .bind(&record.summary_text)
        .bind(&record.model_used)
        .bind(record.summary_length)
        .bind(record.original_text_length)
        .bind(record.compression_ratio)
        .bind(record.processing_time_ms)
        .bind(&record.error_message)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .bind(expected.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, record_id = %record.id, "Failed to update summary record");
            AppError::Database(e)
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn list_summaries_by_status(
        &self,
        status: GenerationStatus,
        limit: i64,
    ) -> Result<Vec<SummaryRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM document_summaries WHERE status = $1 ORDER BY created_at DESC LIMIT $2",
            SUMMARY_COLUMNS
        );
        let records = sqlx::query_as::<Postgres, SummaryRecord>(&query)
            .bind(status.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    #[tracing::instrument(skip(self))]
    async fn find_qa(&self, id: Uuid) -> Result<Option<QaRecord>, AppError> {
        let query = format!("SELECT {} FROM document_qa WHERE id = $1", QA_COLUMNS);
        let record = sqlx::query_as::<Postgres, QaRecord>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    #[tracing::instrument(skip(self))]
    async fn find_qa_by_document(&self, document_id: Uuid) -> Result<Option<QaRecord>, AppError> {
        let query = format!("SELECT {} FROM document_qa WHERE document_id = $1", QA_COLUMNS);
        let record = sqlx::query_as::<Postgres, QaRecord>(&query)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    #[tracing::instrument(skip(self, record, message), fields(document_id = %record.document_id))]
    async fn create_qa_with_outbox(
        &self,
        record: &QaRecord,
        message: &OutboxMessage,
    ) -> Result<CreateOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO document_qa (
                id, document_id, owner_id, status, items, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, '[]'::jsonb, $5, $6)
            ON CONFLICT (document_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(record.document_id)
        .bind(record.owner_id)
        .bind(record.status.to_string())
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, document_id = %record.document_id, "Failed to insert Q&A record");
            AppError::Database(e)
        })?;

        if inserted.is_none() {
            tx.rollback().await?;
            let existing_id = self.existing_id("document_qa", record.document_id).await?;
            return Ok(CreateOutcome::AlreadyExists { existing_id });
        }

        insert_in_tx(&mut tx, message).await.map_err(|e| {
            tracing::error!(error = %e, topic = %message.topic, "Failed to write outbox row");
            AppError::Database(e)
        })?;
        tx.commit().await?;

        Ok(CreateOutcome::Created)
    }

    #[tracing::instrument(skip(self, record), fields(record_id = %record.id, to = %record.status))]
    async fn save_qa(
        &self,
        record: &QaRecord,
        expected: GenerationStatus,
    ) -> Result<bool, AppError> {
        let items = serde_json::to_value(&record.items)?;
        let result = sqlx::query(
            r#"
            UPDATE document_qa
            SET status = $2,
                model_used = $3,
                questions_generated = $4,
                items = $5,
                processing_time_ms = $6,
                processing_error = $7,
                updated_at = $8,
                completed_at = $9
            WHERE id = $1 AND status = $10
            "#,
        )
        .bind(record.id)
        .bind(record.status.to_string())
        .bind(&record.model_used)
        .bind(record.questions_generated)
        .bind(items)
        .bind(record.processing_time_ms)
        .bind(&record.error_message)
        .bind(record.updated_at)
        .bind(record.completed_at)
        .bind(expected.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, record_id = %record.id, "Failed to update Q&A record");
            AppError::Database(e)
        })?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self))]
    async fn list_qa_by_status(
        &self,
        status: GenerationStatus,
        limit: i64,
    ) -> Result<Vec<QaRecord>, AppError> {
        let query = format!(
            "SELECT {} FROM document_qa WHERE status = $1 ORDER BY created_at DESC LIMIT $2",
            QA_COLUMNS
        );
        let records = sqlx::query_as::<Postgres, QaRecord>(&query)
            .bind(status.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}
