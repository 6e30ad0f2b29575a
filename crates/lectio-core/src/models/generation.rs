//! Generation records: the persisted state of one summarization or Q&A request.
//!
//! The coordinator creates a record as a REQUESTED placeholder. Only the owning
//! generation stage moves it to COMPLETED or FAILED.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::status::{GenerationStatus, TransitionError};

/// Which generation workflow a record or request belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GenerationVariant {
    Summarization,
    QaGeneration,
}

impl Display for GenerationVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            GenerationVariant::Summarization => write!(f, "summarization"),
            GenerationVariant::QaGeneration => write!(f, "qa_generation"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub owner_id: Uuid,
    pub status: GenerationStatus,
    pub summary_text: Option<String>,
    pub model_used: Option<String>,
    pub summary_length: Option<i32>,
    pub original_text_length: Option<i32>,
    pub compression_ratio: Option<f64>,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result metrics of a successful summarization.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub summary_text: String,
    pub model_used: String,
    pub summary_length: i32,
    pub original_text_length: i32,
    pub compression_ratio: f64,
    pub processing_time_ms: i64,
}

impl SummaryRecord {
    pub fn requested(document_id: Uuid, owner_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_id,
            owner_id,
            status: GenerationStatus::Requested,
            summary_text: None,
            model_used: None,
            summary_length: None,
            original_text_length: None,
            compression_ratio: None,
            processing_time_ms: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn complete(&mut self, outcome: SummaryOutcome) -> Result<(), TransitionError> {
        self.status = self.status.complete()?;
        let now = Utc::now();
        self.summary_text = Some(outcome.summary_text);
        self.model_used = Some(outcome.model_used);
        self.summary_length = Some(outcome.summary_length);
        self.original_text_length = Some(outcome.original_text_length);
        self.compression_ratio = Some(outcome.compression_ratio);
        self.processing_time_ms = Some(outcome.processing_time_ms);
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(
        &mut self,
        error_message: impl Into<String>,
        processing_time_ms: i64,
    ) -> Result<(), TransitionError> {
        self.status = self.status.fail()?;
        let now = Utc::now();
        self.error_message = Some(error_message.into());
        self.processing_time_ms = Some(processing_time_ms);
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for SummaryRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(SummaryRecord {
            id: row.get("id"),
            document_id: row.get("document_id"),
            owner_id: row.get("owner_id"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse summary status: {}", e).into())
            })?,
            summary_text: row.get("summary_text"),
            model_used: row.get("model_used"),
            summary_length: row.get("summary_length"),
            original_text_length: row.get("original_text_length"),
            compression_ratio: row.get("compression_ratio"),
            processing_time_ms: row.get("processing_time_ms"),
            error_message: row.get("processing_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifficultyLevel {
    Easy,
    Medium,
    Hard,
}

impl Display for DifficultyLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DifficultyLevel::Easy => write!(f, "EASY"),
            DifficultyLevel::Medium => write!(f, "MEDIUM"),
            DifficultyLevel::Hard => write!(f, "HARD"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Factual,
    Conceptual,
    Analytical,
    Procedural,
    Metacognitive,
}

impl Display for QuestionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            QuestionType::Factual => write!(f, "FACTUAL"),
            QuestionType::Conceptual => write!(f, "CONCEPTUAL"),
            QuestionType::Analytical => write!(f, "ANALYTICAL"),
            QuestionType::Procedural => write!(f, "PROCEDURAL"),
            QuestionType::Metacognitive => write!(f, "METACOGNITIVE"),
        }
    }
}

impl FromStr for QuestionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FACTUAL" => Ok(QuestionType::Factual),
            "CONCEPTUAL" => Ok(QuestionType::Conceptual),
            "ANALYTICAL" => Ok(QuestionType::Analytical),
            "PROCEDURAL" => Ok(QuestionType::Procedural),
            "METACOGNITIVE" => Ok(QuestionType::Metacognitive),
            _ => Err(anyhow::anyhow!("Invalid question type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionAnswer {
    pub question: String,
    pub answer: String,
    pub difficulty_level: DifficultyLevel,
    pub question_type: QuestionType,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaRecord {
    pub id: Uuid,
    pub document_id: Uuid,
    pub owner_id: Uuid,
    pub status: GenerationStatus,
    pub model_used: Option<String>,
    pub questions_generated: Option<i32>,
    pub items: Vec<QuestionAnswer>,
    pub processing_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QaRecord {
    pub fn requested(document_id: Uuid, owner_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_id,
            owner_id,
            status: GenerationStatus::Requested,
            model_used: None,
            questions_generated: None,
            items: Vec::new(),
            processing_time_ms: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn complete(
        &mut self,
        model_used: impl Into<String>,
        items: Vec<QuestionAnswer>,
        processing_time_ms: i64,
    ) -> Result<(), TransitionError> {
        self.status = self.status.complete()?;
        let now = Utc::now();
        self.model_used = Some(model_used.into());
        self.questions_generated = Some(items.len() as i32);
        self.items = items;
        self.processing_time_ms = Some(processing_time_ms);
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(
        &mut self,
        error_message: impl Into<String>,
        processing_time_ms: i64,
    ) -> Result<(), TransitionError> {
        self.status = self.status.fail()?;
        let now = Utc::now();
        self.error_message = Some(error_message.into());
        self.processing_time_ms = Some(processing_time_ms);
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for QaRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let items = match row.get::<Option<serde_json::Value>, _>("items") {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse Q&A items: {}", e).into())
            })?,
            None => Vec::new(),
        };
        Ok(QaRecord {
            id: row.get("id"),
            document_id: row.get("document_id"),
            owner_id: row.get("owner_id"),
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse Q&A status: {}", e).into())
            })?,
            model_used: row.get("model_used"),
            questions_generated: row.get("questions_generated"),
            items,
            processing_time_ms: row.get("processing_time_ms"),
            error_message: row.get("processing_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            completed_at: row.get("completed_at"),
        })
    }
}
