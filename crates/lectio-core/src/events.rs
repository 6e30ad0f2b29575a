//! Versioned message schemas exchanged between pipeline stages.
//!
//! Every event type is defined once here and shared by producer and consumer. Payloads
//! are camelCase JSON carrying a `schemaVersion`; [`Envelope::decode`] rejects a payload
//! whose version this build does not understand instead of guessing at its shape.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Document, QuestionAnswer, SummaryOutcome};

/// Current version of every schema in this module.
pub const SCHEMA_VERSION: u16 = 1;

pub mod topics {
    /// Internal work queue of the ingestion stage.
    pub const DOCUMENT_INGESTION_REQUESTED: &str = "documents.ingestion.requested";
    pub const DOCUMENT_PROCESSING_COMPLETED: &str = "documents.processing.completed";
    pub const SUMMARIZATION_REQUESTED: &str = "summarization.requested";
    pub const SUMMARIZATION_COMPLETED: &str = "summarization.completed";
    pub const QA_REQUESTED: &str = "qa.requested";
    pub const QA_COMPLETED: &str = "qa.completed";
}

/// A message type bound to exactly one topic.
pub trait EventSchema: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TOPIC: &'static str;

    /// Partition key; every event in the pipeline is keyed by its document.
    fn key(&self) -> Uuid;

    fn schema_version(&self) -> u16;
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("envelope for topic '{actual}' cannot be decoded as '{expected}'")]
    TopicMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("unsupported schema version {found} for topic '{topic}'")]
    UnsupportedVersion { topic: String, found: u64 },

    #[error("malformed payload for topic '{topic}': {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Broker wire unit wrapping one serialized event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub id: Uuid,
    pub topic: String,
    pub key: Uuid,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
    /// 1 on first delivery, incremented by the broker on each redelivery.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl Envelope {
    pub fn wrap<E: EventSchema>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            topic: E::TOPIC.to_string(),
            key: event.key(),
            payload: serde_json::to_value(event)?,
            published_at: Utc::now(),
            attempt: 1,
        })
    }

    pub fn decode<E: EventSchema>(&self) -> Result<E, EventDecodeError> {
        if self.topic != E::TOPIC {
            return Err(EventDecodeError::TopicMismatch {
                expected: E::TOPIC,
                actual: self.topic.clone(),
            });
        }

        let version = self
            .payload
            .get("schemaVersion")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        if version != u64::from(SCHEMA_VERSION) {
            return Err(EventDecodeError::UnsupportedVersion {
                topic: self.topic.clone(),
                found: version,
            });
        }

        serde_json::from_value(self.payload.clone()).map_err(|source| {
            EventDecodeError::Malformed {
                topic: self.topic.clone(),
                source,
            }
        })
    }
}

/// Asks the ingestion stage to process an UPLOADED document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentIngestionRequested {
    pub schema_version: u16,
    pub document_id: Uuid,
}

impl DocumentIngestionRequested {
    pub fn new(document_id: Uuid) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            document_id,
        }
    }
}

impl EventSchema for DocumentIngestionRequested {
    const TOPIC: &'static str = topics::DOCUMENT_INGESTION_REQUESTED;

    fn key(&self) -> Uuid {
        self.document_id
    }

    fn schema_version(&self) -> u16 {
        self.schema_version
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentProcessingCompleted {
    pub schema_version: u16,
    pub document_id: Uuid,
    pub owner_id: Uuid,
    pub original_filename: String,
    pub extracted_text: String,
    pub language_detected: Option<String>,
    pub page_count: Option<i32>,
    pub mime_type: String,
    pub file_size: i64,
    pub processed_at: DateTime<Utc>,
}

impl From<&Document> for DocumentProcessingCompleted {
    fn from(doc: &Document) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            document_id: doc.id,
            owner_id: doc.owner_id,
            original_filename: doc.original_filename.clone(),
            extracted_text: doc.text().to_string(),
            language_detected: doc.language_detected.clone(),
            page_count: doc.page_count,
            mime_type: doc.mime_type.clone(),
            file_size: doc.file_size,
            processed_at: doc.processed_at.unwrap_or(doc.updated_at),
        }
    }
}

impl EventSchema for DocumentProcessingCompleted {
    const TOPIC: &'static str = topics::DOCUMENT_PROCESSING_COMPLETED;

    fn key(&self) -> Uuid {
        self.document_id
    }

    fn schema_version(&self) -> u16 {
        self.schema_version
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummarizationRequested {
    pub schema_version: u16,
    pub document_id: Uuid,
    pub owner_id: Uuid,
    pub extracted_text: String,
    pub language_detected: Option<String>,
    pub original_filename: String,
    pub summary_record_id: Uuid,
}

impl SummarizationRequested {
    pub fn for_record(source: &DocumentProcessingCompleted, summary_record_id: Uuid) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            document_id: source.document_id,
            owner_id: source.owner_id,
            extracted_text: source.extracted_text.clone(),
            language_detected: source.language_detected.clone(),
            original_filename: source.original_filename.clone(),
            summary_record_id,
        }
    }
}

impl EventSchema for SummarizationRequested {
    const TOPIC: &'static str = topics::SUMMARIZATION_REQUESTED;

    fn key(&self) -> Uuid {
        self.document_id
    }

    fn schema_version(&self) -> u16 {
        self.schema_version
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SummarizationCompleted {
    pub schema_version: u16,
    pub summary_record_id: Uuid,
    pub document_id: Uuid,
    pub owner_id: Uuid,
    pub summary_text: Option<String>,
    pub model_used: Option<String>,
    pub summary_length: i32,
    pub original_text_length: i32,
    pub compression_ratio: f64,
    pub processing_time_ms: i64,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl SummarizationCompleted {
    pub fn succeeded(request: &SummarizationRequested, outcome: &SummaryOutcome) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            summary_record_id: request.summary_record_id,
            document_id: request.document_id,
            owner_id: request.owner_id,
            summary_text: Some(outcome.summary_text.clone()),
            model_used: Some(outcome.model_used.clone()),
            summary_length: outcome.summary_length,
            original_text_length: outcome.original_text_length,
            compression_ratio: outcome.compression_ratio,
            processing_time_ms: outcome.processing_time_ms,
            completed_at: Utc::now(),
            success: true,
            error_message: None,
        }
    }

    pub fn failed(
        request: &SummarizationRequested,
        error_message: impl Into<String>,
        processing_time_ms: i64,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            summary_record_id: request.summary_record_id,
            document_id: request.document_id,
            owner_id: request.owner_id,
            summary_text: None,
            model_used: None,
            summary_length: 0,
            original_text_length: request.extracted_text.chars().count() as i32,
            compression_ratio: 0.0,
            processing_time_ms,
            completed_at: Utc::now(),
            success: false,
            error_message: Some(error_message.into()),
        }
    }
}

impl EventSchema for SummarizationCompleted {
    const TOPIC: &'static str = topics::SUMMARIZATION_COMPLETED;

    fn key(&self) -> Uuid {
        self.document_id
    }

    fn schema_version(&self) -> u16 {
        self.schema_version
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QaGenerationRequested {
    pub schema_version: u16,
    pub document_id: Uuid,
    pub owner_id: Uuid,
    pub extracted_text: String,
    pub language_detected: Option<String>,
    pub original_filename: String,
    pub qa_record_id: Uuid,
    pub desired_question_count: u32,
}

impl QaGenerationRequested {
    pub fn for_record(
        source: &DocumentProcessingCompleted,
        qa_record_id: Uuid,
        desired_question_count: u32,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            document_id: source.document_id,
            owner_id: source.owner_id,
            extracted_text: source.extracted_text.clone(),
            language_detected: source.language_detected.clone(),
            original_filename: source.original_filename.clone(),
            qa_record_id,
            desired_question_count,
        }
    }
}

impl EventSchema for QaGenerationRequested {
    const TOPIC: &'static str = topics::QA_REQUESTED;

    fn key(&self) -> Uuid {
        self.document_id
    }

    fn schema_version(&self) -> u16 {
        self.schema_version
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QaGenerationCompleted {
    pub schema_version: u16,
    pub qa_record_id: Uuid,
    pub document_id: Uuid,
    pub owner_id: Uuid,
    pub model_used: Option<String>,
    pub questions_generated: i32,
    pub items: Vec<QuestionAnswer>,
    pub processing_time_ms: i64,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl QaGenerationCompleted {
    pub fn succeeded(
        request: &QaGenerationRequested,
        model_used: impl Into<String>,
        items: Vec<QuestionAnswer>,
        processing_time_ms: i64,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            qa_record_id: request.qa_record_id,
            document_id: request.document_id,
            owner_id: request.owner_id,
            model_used: Some(model_used.into()),
            questions_generated: items.len() as i32,
            items,
            processing_time_ms,
            completed_at: Utc::now(),
            success: true,
            error_message: None,
        }
    }

    pub fn failed(
        request: &QaGenerationRequested,
        error_message: impl Into<String>,
        processing_time_ms: i64,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            qa_record_id: request.qa_record_id,
            document_id: request.document_id,
            owner_id: request.owner_id,
            model_used: None,
            questions_generated: 0,
            items: Vec::new(),
            processing_time_ms,
            completed_at: Utc::now(),
            success: false,
            error_message: Some(error_message.into()),
        }
    }
}

impl EventSchema for QaGenerationCompleted {
    const TOPIC: &'static str = topics::QA_COMPLETED;

    fn key(&self) -> Uuid {
        self.document_id
    }

    fn schema_version(&self) -> u16 {
        self.schema_version
    }
}
