use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Named steps of the ingestion pipeline, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStep {
    ProcessingStarted,
    TextExtraction,
    DocumentHash,
    LanguageDetection,
    PageCount,
    AutoTagging,
    ProcessingCompleted,
    ProcessingFailed,
}

impl ProcessingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::ProcessingStarted => "PROCESSING_STARTED",
            ProcessingStep::TextExtraction => "TEXT_EXTRACTION",
            ProcessingStep::DocumentHash => "DOCUMENT_HASH",
            ProcessingStep::LanguageDetection => "LANGUAGE_DETECTION",
            ProcessingStep::PageCount => "PAGE_COUNT",
            ProcessingStep::AutoTagging => "AUTO_TAGGING",
            ProcessingStep::ProcessingCompleted => "PROCESSING_COMPLETED",
            ProcessingStep::ProcessingFailed => "PROCESSING_FAILED",
        }
    }
}

impl Display for ProcessingStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING_STARTED" => Ok(ProcessingStep::ProcessingStarted),
            "TEXT_EXTRACTION" => Ok(ProcessingStep::TextExtraction),
            "DOCUMENT_HASH" => Ok(ProcessingStep::DocumentHash),
            "LANGUAGE_DETECTION" => Ok(ProcessingStep::LanguageDetection),
            "PAGE_COUNT" => Ok(ProcessingStep::PageCount),
            "AUTO_TAGGING" => Ok(ProcessingStep::AutoTagging),
            "PROCESSING_COMPLETED" => Ok(ProcessingStep::ProcessingCompleted),
            "PROCESSING_FAILED" => Ok(ProcessingStep::ProcessingFailed),
            _ => Err(anyhow::anyhow!("Invalid processing step: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Warning,
    Error,
}

impl Display for StepStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StepStatus::Success => write!(f, "SUCCESS"),
            StepStatus::Warning => write!(f, "WARNING"),
            StepStatus::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for StepStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(StepStatus::Success),
            "WARNING" => Ok(StepStatus::Warning),
            "ERROR" => Ok(StepStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid step status: {}", s)),
        }
    }
}

/// One append-only audit record of an ingestion step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    pub id: Uuid,
    pub document_id: Uuid,
    pub step: ProcessingStep,
    pub status: StepStatus,
    pub details: serde_json::Value,
    pub processing_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl ProcessingLogEntry {
    pub fn new(
        document_id: Uuid,
        step: ProcessingStep,
        status: StepStatus,
        details: serde_json::Value,
        processing_time_ms: Option<i64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            step,
            status,
            details,
            processing_time_ms,
            created_at: Utc::now(),
        }
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for ProcessingLogEntry {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(ProcessingLogEntry {
            id: row.get("id"),
            document_id: row.get("document_id"),
            step: row.get::<String, _>("processing_step").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse processing step: {}", e).into())
            })?,
            status: row.get::<String, _>("status").parse().map_err(|e| {
                sqlx::Error::Decode(format!("Failed to parse step status: {}", e).into())
            })?,
            details: row
                .get::<Option<serde_json::Value>, _>("details")
                .unwrap_or_else(|| serde_json::json!({})),
            processing_time_ms: row.get("processing_time_ms"),
            created_at: row.get("created_at"),
        })
    }
}
