//! Topic-based message broker.
//!
//! Producers publish [`Envelope`]s to a topic; each subscriber receives every envelope
//! published after it subscribed (plus any backlog that accumulated while the topic had
//! no subscriber). Delivery is at-least-once: a consumer that fails a message hands it
//! back through [`MessageBroker::redeliver`] with the attempt counter incremented.

mod memory;

use async_trait::async_trait;
use lectio_core::events::Envelope;
use std::time::Duration;
use tokio::sync::mpsc;

pub use memory::InMemoryBroker;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode message for topic '{topic}': {source}")]
    Encode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Receiving end of a topic subscription.
pub struct Subscription {
    topic: String,
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }

    /// A subscription fed directly through the returned sender, bypassing any broker.
    pub fn channel(topic: impl Into<String>) -> (mpsc::UnboundedSender<Envelope>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(topic, rx))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next envelope, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError>;

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError>;

    /// Publishes `envelope` again after `delay`, as its next delivery attempt.
    async fn redeliver(&self, mut envelope: Envelope, delay: Duration) -> Result<(), BrokerError> {
        envelope.attempt += 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        tracing::debug!(
            message_id = %envelope.id,
            topic = %envelope.topic,
            attempt = envelope.attempt,
            "Redelivering message"
        );
        self.publish(envelope).await
    }
}
