//! Outbox relay: moves committed outbox rows onto the broker.

use std::sync::Arc;
use std::time::Duration;

use lectio_core::{AppError, OutboxConfig};
use lectio_db::OutboxRepositoryTrait;
use lectio_infra::MessageBroker;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Background service that publishes pending outbox rows.
///
/// A row is marked published only after the broker accepted it, so a crash between the
/// two steps republishes it. Consumers dedup.
#[derive(Clone)]
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxRepositoryTrait>,
    broker: Arc<dyn MessageBroker>,
    config: OutboxConfig,
}

impl OutboxRelay {
    pub fn new(
        outbox: Arc<dyn OutboxRepositoryTrait>,
        broker: Arc<dyn MessageBroker>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            outbox,
            broker,
            config,
        }
    }

    /// Publishes one batch of pending rows and returns how many went out. Stops at the
    /// first broker failure; the failed row stays pending.
    #[tracing::instrument(skip(self))]
    pub async fn relay_pending(&self) -> Result<usize, AppError> {
        let pending = self.outbox.fetch_pending(self.config.batch_size).await?;
        let mut published = 0;

        for message in pending {
            match self.broker.publish(message.to_envelope()).await {
                Ok(()) => {
                    self.outbox.mark_published(message.id).await?;
                    published += 1;
                    tracing::debug!(
                        outbox_id = %message.id,
                        topic = %message.topic,
                        key = %message.key,
                        "Outbox message published"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        outbox_id = %message.id,
                        topic = %message.topic,
                        attempts = message.attempts + 1,
                        error = %e,
                        "Failed to publish outbox message"
                    );
                    self.outbox.record_failure(message.id, &e.to_string()).await?;
                    break;
                }
            }
        }

        Ok(published)
    }

    /// Polls the outbox until `shutdown` fires, then makes one last pass.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms.max(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                poll_interval_ms = self.config.poll_interval_ms,
                batch_size = self.config.batch_size,
                "Outbox relay started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.relay_pending().await {
                            tracing::error!(error = %e, "Outbox relay pass failed");
                        }
                    }
                }
            }

            if let Err(e) = self.relay_pending().await {
                tracing::error!(error = %e, "Final outbox relay pass failed");
            }
            tracing::info!("Outbox relay stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectio_core::events::{topics, DocumentProcessingCompleted, SummarizationRequested};
    use lectio_core::models::{Document, SummaryRecord};
    use lectio_db::{GenerationRepositoryTrait, InMemoryStore, OutboxMessage};
    use lectio_infra::InMemoryBroker;
    use uuid::Uuid;

    async fn seed(store: &InMemoryStore) -> OutboxMessage {
        let mut doc = Document::uploaded(
            Uuid::new_v4(),
            "notes.txt",
            "text/plain",
            10,
            "documents/x/notes.txt",
        );
        doc.extracted_text = Some("text".into());
        let source = DocumentProcessingCompleted::from(&doc);
        let record = SummaryRecord::requested(doc.id, doc.owner_id);
        let event = SummarizationRequested::for_record(&source, record.id);
        let message = OutboxMessage::from_event(&event).unwrap();
        store
            .create_summary_with_outbox(&record, &message)
            .await
            .unwrap();
        message
    }

    fn relay(store: &InMemoryStore, broker: &InMemoryBroker) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            OutboxConfig {
                poll_interval_ms: 10,
                batch_size: 10,
            },
        )
    }

    #[tokio::test]
    async fn publishes_and_marks_rows() {
        let store = InMemoryStore::new();
        let broker = InMemoryBroker::new();
        let message = seed(&store).await;

        let relay = relay(&store, &broker);
        assert_eq!(relay.relay_pending().await.unwrap(), 1);
        assert_eq!(relay.relay_pending().await.unwrap(), 0);

        let published = broker.published(topics::SUMMARIZATION_REQUESTED).await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].id, message.id);
        assert!(store.outbox_messages().await[0].published_at.is_some());
    }

    #[tokio::test]
    async fn broker_failure_keeps_row_pending() {
        let store = InMemoryStore::new();
        let broker = InMemoryBroker::new();
        seed(&store).await;
        broker.set_unavailable(true).await;

        let relay = relay(&store, &broker);
        assert_eq!(relay.relay_pending().await.unwrap(), 0);
        let rows = store.outbox_messages().await;
        assert!(rows[0].published_at.is_none());
        assert_eq!(rows[0].attempts, 1);
        assert!(rows[0].last_error.is_some());

        broker.set_unavailable(false).await;
        assert_eq!(relay.relay_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn background_relay_flushes_on_shutdown() {
        let store = InMemoryStore::new();
        let broker = InMemoryBroker::new();
        let shutdown = CancellationToken::new();
        let handle = relay(&store, &broker).spawn(shutdown.clone());

        seed(&store).await;
        let seen = broker
            .wait_for(topics::SUMMARIZATION_REQUESTED, 1, Duration::from_secs(2))
            .await;
        assert_eq!(seen.len(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
