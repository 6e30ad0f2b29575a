//! Bounded worker pool over a broker subscription.
//!
//! Shutdown: cancelling the pool's token stops it from taking new messages, cancels the
//! token handed to in-flight handlers and makes [`WorkerPool::join`] wait until every
//! running handler has returned. A handler that gives up with a recoverable error
//! during shutdown has its message handed back to the broker as the same attempt.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lectio_core::events::Envelope;
use lectio_core::StageConfig;
use lectio_infra::{MessageBroker, Subscription};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::handler::MessageHandler;

/// Upper bound on the delay before a failed message is redelivered.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(300);

/// Backoff before redelivering a message whose `attempt`-th delivery failed:
/// `base * 2^(attempt - 1)`, capped at [`MAX_RETRY_BACKOFF`].
#[inline]
pub fn compute_retry_backoff(base: Duration, attempt: u32) -> Duration {
    let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub max_workers: usize,
    pub item_timeout: Duration,
    pub max_deliveries: u32,
    pub retry_base_delay: Duration,
}

impl WorkerPoolConfig {
    pub fn from_stage(stage: &StageConfig) -> Self {
        Self {
            max_workers: stage.max_workers.max(1),
            item_timeout: stage.item_timeout(),
            max_deliveries: stage.max_deliveries.max(1),
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

pub struct WorkerPool {
    name: &'static str,
    handle: JoinHandle<()>,
}

struct PoolContext {
    name: &'static str,
    config: WorkerPoolConfig,
    handler: Arc<dyn MessageHandler>,
    broker: Arc<dyn MessageBroker>,
    shutdown: CancellationToken,
    /// Cancelled for running handlers once the pool has stopped consuming.
    in_flight: CancellationToken,
}

impl WorkerPool {
    /// Starts consuming `subscription` on a background task.
    pub fn spawn(
        config: WorkerPoolConfig,
        subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
        broker: Arc<dyn MessageBroker>,
        shutdown: CancellationToken,
    ) -> Self {
        let name = handler.name();
        let ctx = Arc::new(PoolContext {
            name,
            config,
            handler,
            broker,
            shutdown,
            in_flight: CancellationToken::new(),
        });
        let handle = tokio::spawn(Self::run(ctx, subscription));
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Waits for the pool loop and its in-flight handlers to finish.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::error!(pool = self.name, error = %e, "Worker pool task panicked");
        }
    }

    async fn run(ctx: Arc<PoolContext>, mut subscription: Subscription) {
        let max_workers = ctx.config.max_workers;
        tracing::info!(
            pool = ctx.name,
            topic = %subscription.topic(),
            max_workers,
            item_timeout_secs = ctx.config.item_timeout.as_secs(),
            max_deliveries = ctx.config.max_deliveries,
            "Worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(max_workers));

        loop {
            let envelope = tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                next = subscription.recv() => match next {
                    Some(envelope) => envelope,
                    None => {
                        tracing::info!(pool = ctx.name, "Subscription closed");
                        break;
                    }
                },
            };

            let permit = tokio::select! {
                _ = ctx.shutdown.cancelled() => {
                    tracing::warn!(
                        pool = ctx.name,
                        message_id = %envelope.id,
                        "Shutdown while waiting for a worker, message not processed"
                    );
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let ctx = ctx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                Self::process(&ctx, envelope).await;
            });
        }

        // messages handed back while draining must reach the broker, not this channel
        drop(subscription);
        if ctx.shutdown.is_cancelled() {
            ctx.in_flight.cancel();
        }
        tracing::info!(pool = ctx.name, "Worker pool draining in-flight work");
        let _ = semaphore.acquire_many(max_workers as u32).await;
        tracing::info!(pool = ctx.name, "Worker pool stopped");
    }

    #[tracing::instrument(
        skip(ctx, envelope),
        fields(pool = ctx.name, message_id = %envelope.id, attempt = envelope.attempt)
    )]
    async fn process(ctx: &PoolContext, envelope: Envelope) {
        let started = Instant::now();
        let result = tokio::time::timeout(
            ctx.config.item_timeout,
            ctx.handler.handle(&envelope, ctx.in_flight.child_token()),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                tracing::debug!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Message handled"
                );
            }
            Ok(Err(e)) if e.is_recoverable() && ctx.in_flight.is_cancelled() => {
                tracing::warn!(error = %e, "Message interrupted by shutdown");
                Self::hand_back(ctx, envelope).await;
            }
            Ok(Err(e)) => {
                let recoverable = e.is_recoverable();
                tracing::error!(
                    error = %e,
                    recoverable,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Message handling failed"
                );
                if recoverable {
                    Self::schedule_redelivery(ctx, envelope);
                } else {
                    tracing::error!("Unrecoverable failure, message dropped");
                }
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = ctx.config.item_timeout.as_secs(),
                    "Message handling timed out"
                );
                Self::schedule_redelivery(ctx, envelope);
            }
        }
    }

    async fn hand_back(ctx: &PoolContext, envelope: Envelope) {
        let message_id = envelope.id;
        match ctx.broker.publish(envelope).await {
            Ok(()) => tracing::info!("Message handed back to the broker"),
            Err(e) => tracing::error!(message_id = %message_id, error = %e, "Failed to hand message back"),
        }
    }

    fn schedule_redelivery(ctx: &PoolContext, envelope: Envelope) {
        if envelope.attempt >= ctx.config.max_deliveries {
            tracing::error!(
                max_deliveries = ctx.config.max_deliveries,
                "Message failed on its last delivery, dropped"
            );
            return;
        }
        if ctx.shutdown.is_cancelled() {
            tracing::warn!("Shutting down, message not redelivered");
            return;
        }

        let delay = compute_retry_backoff(ctx.config.retry_base_delay, envelope.attempt);
        tracing::info!(
            backoff_ms = delay.as_millis() as u64,
            next_attempt = envelope.attempt + 1,
            "Scheduling redelivery"
        );
        let broker = ctx.broker.clone();
        tokio::spawn(async move {
            let message_id = envelope.id;
            if let Err(e) = broker.redeliver(envelope, delay).await {
                tracing::error!(message_id = %message_id, error = %e, "Redelivery failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use lectio_core::TaskError;
    use lectio_infra::InMemoryBroker;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    const TOPIC: &str = "test.topic";

    fn envelope() -> Envelope {
        Envelope {
            id: Uuid::new_v4(),
            topic: TOPIC.to_string(),
            key: Uuid::new_v4(),
            payload: serde_json::json!({"schemaVersion": 1}),
            published_at: Utc::now(),
            attempt: 1,
        }
    }

    fn config(max_workers: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            max_workers,
            item_timeout: Duration::from_millis(200),
            max_deliveries: 3,
            retry_base_delay: Duration::from_millis(5),
        }
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        FailRecoverable,
        FailUnrecoverable,
        Hang,
        /// Gives up with a recoverable error once cancelled.
        Interrupted,
    }

    struct TestHandler {
        behaviour: Behaviour,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl TestHandler {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for TestHandler {
        fn name(&self) -> &'static str {
            "test"
        }

        async fn handle(
            &self,
            _envelope: &Envelope,
            cancel: CancellationToken,
        ) -> Result<(), TaskError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let result = match self.behaviour {
                Behaviour::Succeed => {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                }
                Behaviour::FailRecoverable => {
                    Err(TaskError::recoverable(anyhow::anyhow!("database unreachable")))
                }
                Behaviour::FailUnrecoverable => {
                    Err(TaskError::unrecoverable(anyhow::anyhow!("bad payload")))
                }
                Behaviour::Hang => {
                    cancel.cancelled().await;
                    Ok(())
                }
                Behaviour::Interrupted => {
                    cancel.cancelled().await;
                    Err(TaskError::recoverable(anyhow::anyhow!("interrupted")))
                }
            };
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    async fn run_pool(
        behaviour: Behaviour,
        max_workers: usize,
        messages: usize,
        settle: Duration,
    ) -> (Arc<TestHandler>, InMemoryBroker) {
        let broker = InMemoryBroker::new();
        let subscription = broker.subscribe(TOPIC).await.unwrap();
        let handler = TestHandler::new(behaviour);
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(
            config(max_workers),
            subscription,
            handler.clone(),
            Arc::new(broker.clone()),
            shutdown.clone(),
        );
        for _ in 0..messages {
            broker.publish(envelope()).await.unwrap();
        }
        tokio::time::sleep(settle).await;
        shutdown.cancel();
        pool.join().await;
        (handler, broker)
    }

    #[test]
    fn retry_backoff_exponential_then_capped() {
        let base = Duration::from_secs(1);
        assert_eq!(compute_retry_backoff(base, 1), Duration::from_secs(1));
        assert_eq!(compute_retry_backoff(base, 2), Duration::from_secs(2));
        assert_eq!(compute_retry_backoff(base, 3), Duration::from_secs(4));
        assert_eq!(compute_retry_backoff(base, 9), Duration::from_secs(256));
        assert_eq!(compute_retry_backoff(base, 10), MAX_RETRY_BACKOFF);
        assert_eq!(compute_retry_backoff(base, 40), MAX_RETRY_BACKOFF);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let (handler, _) =
            run_pool(Behaviour::Succeed, 2, 8, Duration::from_millis(300)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 8);
        assert!(handler.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn recoverable_failures_are_redelivered_up_to_limit() {
        let (handler, broker) =
            run_pool(Behaviour::FailRecoverable, 1, 1, Duration::from_millis(300)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let attempts: Vec<u32> = broker
            .published(TOPIC)
            .await
            .iter()
            .map(|e| e.attempt)
            .collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn unrecoverable_failures_are_dropped() {
        let (handler, broker) =
            run_pool(Behaviour::FailUnrecoverable, 1, 1, Duration::from_millis(100)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.published(TOPIC).await.len(), 1);
    }

    #[tokio::test]
    async fn timed_out_items_are_redelivered() {
        let (handler, broker) =
            run_pool(Behaviour::Hang, 1, 1, Duration::from_millis(800)).await;
        assert!(handler.calls.load(Ordering::SeqCst) >= 2);
        assert!(broker.published(TOPIC).await.len() >= 2);
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_handlers() {
        let broker = InMemoryBroker::new();
        let subscription = broker.subscribe(TOPIC).await.unwrap();
        let handler = TestHandler::new(Behaviour::Hang);
        let shutdown = CancellationToken::new();
        let mut cfg = config(1);
        cfg.item_timeout = Duration::from_secs(30);
        let pool = WorkerPool::spawn(
            cfg,
            subscription,
            handler.clone(),
            Arc::new(broker.clone()),
            shutdown.clone(),
        );
        broker.publish(envelope()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), pool.join())
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn interrupted_message_goes_back_to_the_broker() {
        let broker = InMemoryBroker::new();
        let subscription = broker.subscribe(TOPIC).await.unwrap();
        let handler = TestHandler::new(Behaviour::Interrupted);
        let shutdown = CancellationToken::new();
        let mut cfg = config(1);
        cfg.item_timeout = Duration::from_secs(30);
        let pool = WorkerPool::spawn(
            cfg,
            subscription,
            handler.clone(),
            Arc::new(broker.clone()),
            shutdown.clone(),
        );
        let sent = envelope();
        broker.publish(sent.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        pool.join().await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // the next process to subscribe gets it, still on its first attempt
        let mut next = broker.subscribe(TOPIC).await.unwrap();
        let handed_back = tokio::time::timeout(Duration::from_secs(1), next.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handed_back.id, sent.id);
        assert_eq!(handed_back.attempt, 1);
    }
}
