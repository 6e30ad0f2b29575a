//! Lectio worker infrastructure
//!
//! [`WorkerPool`] drains a broker subscription through a [`MessageHandler`] with bounded
//! concurrency, a per-item deadline and redelivery of recoverable failures.
//! [`OutboxRelay`] publishes committed outbox rows to the broker.

pub mod handler;
pub mod pool;
pub mod relay;

pub use handler::MessageHandler;
pub use pool::{compute_retry_backoff, WorkerPool, WorkerPoolConfig, MAX_RETRY_BACKOFF};
pub use relay::OutboxRelay;
