use std::sync::Arc;

use lectio_core::events::{DocumentProcessingCompleted, Envelope};
use lectio_core::models::Document;
use lectio_infra::MessageBroker;

/// Emits `documents.processing.completed` for successfully ingested documents.
#[derive(Clone)]
pub struct CompletionPublisher {
    broker: Arc<dyn MessageBroker>,
}

impl CompletionPublisher {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }

    /// Publishes the completion event. Failures are logged and reported as `false`;
    /// the document keeps its COMPLETED status either way.
    #[tracing::instrument(skip(self, document), fields(document_id = %document.id))]
    pub async fn publish_completed(&self, document: &Document) -> bool {
        let event = DocumentProcessingCompleted::from(document);
        let envelope = match Envelope::wrap(&event) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode processing completed event");
                return false;
            }
        };

        match self.broker.publish(envelope).await {
            Ok(()) => {
                tracing::info!(
                    text_length = event.extracted_text.chars().count(),
                    language = ?event.language_detected,
                    page_count = ?event.page_count,
                    "Document processing completed event published"
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to publish processing completed event");
                false
            }
        }
    }
}
