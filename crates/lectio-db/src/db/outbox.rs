//! Transactional outbox.
//!
//! Request events are written to the `outbox` table in the same transaction as the
//! record they describe. The relay in `lectio-worker` reads pending rows, publishes
//! them to the broker and marks them published. Delivery is at-least-once; consumers
//! dedup on document and variant.

use chrono::{DateTime, Utc};
use lectio_core::events::{Envelope, EventSchema};
use lectio_core::AppError;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub topic: String,
    pub key: Uuid,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl OutboxMessage {
    pub fn from_event<E: EventSchema>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            topic: E::TOPIC.to_string(),
            key: event.key(),
            payload: serde_json::to_value(event)?,
            created_at: Utc::now(),
            published_at: None,
            attempts: 0,
            last_error: None,
        })
    }

    /// Broker envelope for this row. The envelope id is the outbox id so a consumer
    /// can recognise a republished row.
    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            id: self.id,
            topic: self.topic.clone(),
            key: self.key,
            payload: self.payload.clone(),
            published_at: Utc::now(),
            attempt: 1,
        }
    }
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for OutboxMessage {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(OutboxMessage {
            id: row.get("id"),
            topic: row.get("topic"),
            key: row.get("message_key"),
            payload: row.get("payload"),
            created_at: row.get("created_at"),
            published_at: row.get("published_at"),
            attempts: row.get("attempts"),
            last_error: row.get("last_error"),
        })
    }
}

#[async_trait::async_trait]
pub trait OutboxRepositoryTrait: Send + Sync {
    /// Unpublished rows, oldest first.
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxMessage>, AppError>;

    async fn mark_published(&self, id: Uuid) -> Result<(), AppError>;

    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), AppError>;
}

/// Inserts an outbox row inside an open transaction.
pub(crate) async fn insert_in_tx(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    message: &OutboxMessage,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO outbox (id, topic, message_key, payload, created_at, attempts)
        VALUES ($1, $2, $3, $4, $5, 0)
        "#,
    )
    .bind(message.id)
    .bind(&message.topic)
    .bind(message.key)
    .bind(&message.payload)
    .bind(message.created_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OutboxRepositoryTrait for PostgresOutboxRepository {
    #[tracing::instrument(skip(self))]
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxMessage>, AppError> {
        let messages = sqlx::query_as::<Postgres, OutboxMessage>(
            r#"
            SELECT id, topic, message_key, payload, created_at, published_at, attempts, last_error
            FROM outbox
            WHERE published_at IS NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_published(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET published_at = NOW(), attempts = attempts + 1, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn record_failure(&self, id: Uuid, error: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET attempts = attempts + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
