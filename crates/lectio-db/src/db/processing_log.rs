use chrono::{DateTime, Utc};
use lectio_core::models::ProcessingLogEntry;
use lectio_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

/// Append-only audit trail. There is deliberately no update or delete.
#[async_trait::async_trait]
pub trait ProcessingLogRepositoryTrait: Send + Sync {
    async fn append(&self, entry: &ProcessingLogEntry) -> Result<(), AppError>;

    /// Entries for one document, oldest first.
    async fn list_by_document(&self, document_id: Uuid)
        -> Result<Vec<ProcessingLogEntry>, AppError>;

    /// ERROR entries created after `since`, newest first.
    async fn errors_since(&self, since: DateTime<Utc>) -> Result<Vec<ProcessingLogEntry>, AppError>;
}

#[derive(Clone)]
pub struct PostgresProcessingLogRepository {
    pool: PgPool,
}

impl PostgresProcessingLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProcessingLogRepositoryTrait for PostgresProcessingLogRepository {
    #[tracing::instrument(skip(self, entry), fields(document_id = %entry.document_id, step = %entry.step))]
    async fn append(&self, entry: &ProcessingLogEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO document_processing_logs (
                id, document_id, processing_step, status, details, processing_time_ms, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.document_id)
        .bind(entry.step.as_str())
        .bind(entry.status.to_string())
        .bind(&entry.details)
        .bind(entry.processing_time_ms)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_by_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<ProcessingLogEntry>, AppError> {
        let entries = sqlx::query_as::<Postgres, ProcessingLogEntry>(
            r#"
            SELECT id, document_id, processing_step, status, details, processing_time_ms, created_at
            FROM document_processing_logs
            WHERE document_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    #[tracing::instrument(skip(self))]
    async fn errors_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProcessingLogEntry>, AppError> {
        let entries = sqlx::query_as::<Postgres, ProcessingLogEntry>(
            r#"
            SELECT id, document_id, processing_step, status, details, processing_time_ms, created_at
            FROM document_processing_logs
            WHERE status = 'ERROR' AND created_at >= $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
