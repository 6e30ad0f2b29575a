use lectio_core::models::Tag;
use lectio_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

#[async_trait::async_trait]
pub trait TagRepositoryTrait: Send + Sync {
    async fn insert_many(&self, tags: &[Tag]) -> Result<(), AppError>;

    async fn list_by_document(&self, document_id: Uuid) -> Result<Vec<Tag>, AppError>;
}

#[derive(Clone)]
pub struct PostgresTagRepository {
    pool: PgPool,
}

impl PostgresTagRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TagRepositoryTrait for PostgresTagRepository {
    #[tracing::instrument(skip(self, tags), fields(count = tags.len()))]
    async fn insert_many(&self, tags: &[Tag]) -> Result<(), AppError> {
        if tags.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for tag in tags {
            sqlx::query(
                r#"
                INSERT INTO document_tags (id, document_id, tag, confidence_score, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(tag.id)
            .bind(tag.document_id)
            .bind(&tag.label)
            .bind(tag.confidence)
            .bind(tag.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_by_document(&self, document_id: Uuid) -> Result<Vec<Tag>, AppError> {
        let tags = sqlx::query_as::<Postgres, Tag>(
            r#"
            SELECT id, document_id, tag, confidence_score, created_at
            FROM document_tags
            WHERE document_id = $1
            ORDER BY confidence_score DESC, tag ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tags)
    }
}
