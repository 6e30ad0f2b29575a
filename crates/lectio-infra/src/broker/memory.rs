use async_trait::async_trait;
use lectio_core::events::Envelope;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::{BrokerError, MessageBroker, Subscription};

#[derive(Default)]
struct Topic {
    subscribers: Vec<mpsc::UnboundedSender<Envelope>>,
    backlog: VecDeque<Envelope>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, Topic>,
    published: Vec<Envelope>,
    unavailable: bool,
}

/// In-process broker over unbounded tokio channels.
///
/// Every subscriber of a topic receives its own copy of each envelope. Envelopes
/// published while a topic has no live subscriber are kept and handed to the next one.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail until reset.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Every envelope accepted for `topic`, redeliveries included, in publish order.
    pub async fn published(&self, topic: &str) -> Vec<Envelope> {
        self.state
            .lock()
            .await
            .published
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Polls until at least `count` envelopes were published to `topic` or `timeout`
    /// elapses, then returns what is there.
    pub async fn wait_for(&self, topic: &str, count: usize, timeout: Duration) -> Vec<Envelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self.published(topic).await;
            if seen.len() >= count || tokio::time::Instant::now() >= deadline {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(BrokerError::Unavailable(format!(
                "cannot publish to '{}'",
                envelope.topic
            )));
        }

        state.published.push(envelope.clone());

        let topic = state.topics.entry(envelope.topic.clone()).or_default();
        topic.subscribers.retain(|tx| !tx.is_closed());
        if topic.subscribers.is_empty() {
            topic.backlog.push_back(envelope);
            return Ok(());
        }
        for tx in &topic.subscribers {
            // a receiver dropped since the retain above just misses this one
            let _ = tx.send(envelope.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError> {
        let mut state = self.state.lock().await;
        let entry = state.topics.entry(topic.to_string()).or_default();
        let (tx, rx) = mpsc::unbounded_channel();
        for envelope in entry.backlog.drain(..) {
            let _ = tx.send(envelope);
        }
        entry.subscribers.push(tx);
        tracing::debug!(topic = %topic, subscribers = entry.subscribers.len(), "Subscribed");
        Ok(Subscription::new(topic, rx))
    }
}
