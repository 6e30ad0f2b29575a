use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: Uuid,
    pub document_id: Uuid,
    pub label: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn new(document_id: Uuid, label: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            label: label.into(),
            confidence,
            created_at: Utc::now(),
        }
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Tag {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Tag {
            id: row.get("id"),
            document_id: row.get("document_id"),
            label: row.get("tag"),
            confidence: row.get("confidence_score"),
            created_at: row.get("created_at"),
        })
    }
}
