//! Append-only audit trail of ingestion steps.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lectio_core::models::{ProcessingLogEntry, ProcessingStep, StepStatus};
use lectio_core::AppError;
use lectio_db::ProcessingLogRepositoryTrait;
use uuid::Uuid;

#[derive(Clone)]
pub struct ProcessingLogRecorder {
    logs: Arc<dyn ProcessingLogRepositoryTrait>,
}

impl ProcessingLogRecorder {
    pub fn new(logs: Arc<dyn ProcessingLogRepositoryTrait>) -> Self {
        Self { logs }
    }

    /// Appends one entry. A repository failure is logged and swallowed so that the
    /// audit trail never aborts ingestion.
    pub async fn record(
        &self,
        document_id: Uuid,
        step: ProcessingStep,
        status: StepStatus,
        details: serde_json::Value,
        elapsed: Option<Duration>,
    ) {
        let entry = ProcessingLogEntry::new(
            document_id,
            step,
            status,
            details,
            elapsed.map(|d| d.as_millis() as i64),
        );

        if let Err(e) = self.logs.append(&entry).await {
            tracing::error!(
                document_id = %document_id,
                step = %step,
                error = %e,
                "Failed to record processing step"
            );
            return;
        }

        tracing::debug!(
            document_id = %document_id,
            step = %step,
            status = %status,
            processing_time_ms = ?entry.processing_time_ms,
            "Processing step recorded"
        );
    }

    /// Entries for a document in the order they were written.
    pub async fn history(&self, document_id: Uuid) -> Result<Vec<ProcessingLogEntry>, AppError> {
        self.logs.list_by_document(document_id).await
    }

    /// ERROR entries created after `since`.
    pub async fn recent_errors(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ProcessingLogEntry>, AppError> {
        self.logs.errors_since(since).await
    }

    pub async fn errors_in_last_hours(
        &self,
        hours_back: i64,
    ) -> Result<Vec<ProcessingLogEntry>, AppError> {
        self.recent_errors(Utc::now() - chrono::Duration::hours(hours_back.max(0)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectio_db::InMemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn history_keeps_write_order() {
        let recorder = ProcessingLogRecorder::new(Arc::new(InMemoryStore::new()));
        let id = Uuid::new_v4();
        for step in [
            ProcessingStep::ProcessingStarted,
            ProcessingStep::TextExtraction,
            ProcessingStep::DocumentHash,
        ] {
            recorder
                .record(id, step, StepStatus::Success, json!({}), None)
                .await;
        }

        let steps: Vec<ProcessingStep> = recorder
            .history(id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.step)
            .collect();
        assert_eq!(
            steps,
            vec![
                ProcessingStep::ProcessingStarted,
                ProcessingStep::TextExtraction,
                ProcessingStep::DocumentHash,
            ]
        );
    }

    #[tokio::test]
    async fn recent_errors_only_lists_errors() {
        let recorder = ProcessingLogRecorder::new(Arc::new(InMemoryStore::new()));
        let id = Uuid::new_v4();
        recorder
            .record(id, ProcessingStep::LanguageDetection, StepStatus::Warning, json!({}), None)
            .await;
        recorder
            .record(
                id,
                ProcessingStep::ProcessingFailed,
                StepStatus::Error,
                json!({"errorMessage": "boom"}),
                Some(Duration::from_millis(12)),
            )
            .await;

        let errors = recorder.errors_in_last_hours(24).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].step, ProcessingStep::ProcessingFailed);
        assert_eq!(errors[0].processing_time_ms, Some(12));
    }
}
