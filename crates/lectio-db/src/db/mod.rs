//! Repositories for documents, processing logs, tags, generation records and the outbox.
//!
//! Each concern has a `*RepositoryTrait` with a Postgres implementation and a shared
//! in-memory implementation ([`InMemoryStore`]). [`Repositories`] bundles one of each
//! for wiring.

use std::sync::Arc;

use sqlx::PgPool;

pub mod document;
pub mod generation;
pub mod memory;
pub mod outbox;
pub mod pool;
pub mod processing_log;
pub mod tag;

pub use document::{DocumentRepositoryTrait, PostgresDocumentRepository};
pub use generation::{CreateOutcome, GenerationRepositoryTrait, PostgresGenerationRepository};
pub use memory::InMemoryStore;
pub use outbox::{OutboxMessage, OutboxRepositoryTrait, PostgresOutboxRepository};
pub use pool::{connect, run_migrations};
pub use processing_log::{PostgresProcessingLogRepository, ProcessingLogRepositoryTrait};
pub use tag::{PostgresTagRepository, TagRepositoryTrait};

#[derive(Clone)]
pub struct Repositories {
    pub documents: Arc<dyn DocumentRepositoryTrait>,
    pub logs: Arc<dyn ProcessingLogRepositoryTrait>,
    pub tags: Arc<dyn TagRepositoryTrait>,
    pub generations: Arc<dyn GenerationRepositoryTrait>,
    pub outbox: Arc<dyn OutboxRepositoryTrait>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            documents: Arc::new(PostgresDocumentRepository::new(pool.clone())),
            logs: Arc::new(PostgresProcessingLogRepository::new(pool.clone())),
            tags: Arc::new(PostgresTagRepository::new(pool.clone())),
            generations: Arc::new(PostgresGenerationRepository::new(pool.clone())),
            outbox: Arc::new(PostgresOutboxRepository::new(pool)),
        }
    }

    /// All repositories backed by one store. The store is returned as well so tests
    /// can inspect it.
    pub fn in_memory() -> (Self, InMemoryStore) {
        let store = InMemoryStore::new();
        let repos = Self {
            documents: Arc::new(store.clone()),
            logs: Arc::new(store.clone()),
            tags: Arc::new(store.clone()),
            generations: Arc::new(store.clone()),
            outbox: Arc::new(store.clone()),
        };
        (repos, store)
    }
}
