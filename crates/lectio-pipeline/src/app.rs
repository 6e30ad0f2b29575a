//! Wires the stages onto worker pools and the outbox relay.

use std::sync::Arc;

use anyhow::{Context, Result};
use lectio_core::events::topics;
use lectio_core::Config;
use lectio_db::Repositories;
use lectio_infra::MessageBroker;
use lectio_processing::{LanguageDetector, PageCounter, TextExtractor};
use lectio_services::GenerationBackend;
use lectio_storage::Storage;
use lectio_worker::{MessageHandler, OutboxRelay, WorkerPool, WorkerPoolConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordinator::AiCoordinator;
use crate::generation::{QaGenerationStage, SummarizationStage};
use crate::ingestion::{CompletionPublisher, IngestionStage, ProcessingLogRecorder};
use crate::service::DocumentService;

/// External collaborators injected into the stages.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn Storage>,
    pub extractor: Arc<dyn TextExtractor>,
    pub detector: Arc<dyn LanguageDetector>,
    pub page_counter: Arc<dyn PageCounter>,
    pub backend: Arc<dyn GenerationBackend>,
}

/// A running pipeline: four worker pools and the outbox relay under one shutdown token.
pub struct Pipeline {
    service: DocumentService,
    pools: Vec<WorkerPool>,
    relay: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Pipeline {
    pub async fn start(
        config: &Config,
        repos: Repositories,
        collaborators: Collaborators,
        broker: Arc<dyn MessageBroker>,
    ) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let recorder = ProcessingLogRecorder::new(repos.logs.clone());

        let ingestion = IngestionStage::new(
            repos.documents.clone(),
            repos.tags.clone(),
            recorder,
            CompletionPublisher::new(broker.clone()),
            collaborators.clone(),
            config.collaborator_timeout(),
        );
        let coordinator = AiCoordinator::new(
            repos.generations.clone(),
            config.desired_question_count,
            config.min_content_length,
        );
        let summarization = SummarizationStage::new(
            repos.generations.clone(),
            collaborators.backend.clone(),
            broker.clone(),
            config.models.clone(),
            config.backend_timeout(),
        );
        let qa = QaGenerationStage::new(
            repos.generations.clone(),
            collaborators.backend.clone(),
            broker.clone(),
            config.models.clone(),
            config.backend_timeout(),
            config.qa.work_deadline(),
        );

        let stages: [(&str, WorkerPoolConfig, Arc<dyn MessageHandler>); 4] = [
            (
                topics::DOCUMENT_INGESTION_REQUESTED,
                WorkerPoolConfig::from_stage(&config.ingestion),
                Arc::new(ingestion),
            ),
            (
                topics::DOCUMENT_PROCESSING_COMPLETED,
                WorkerPoolConfig::from_stage(&config.coordinator),
                Arc::new(coordinator),
            ),
            (
                topics::SUMMARIZATION_REQUESTED,
                WorkerPoolConfig::from_stage(&config.summarization),
                Arc::new(summarization),
            ),
            (
                topics::QA_REQUESTED,
                WorkerPoolConfig::from_stage(&config.qa),
                Arc::new(qa),
            ),
        ];

        let mut pools = Vec::with_capacity(stages.len());
        for (topic, pool_config, handler) in stages {
            let subscription = broker
                .subscribe(topic)
                .await
                .with_context(|| format!("Failed to subscribe to {}", topic))?;
            pools.push(WorkerPool::spawn(
                pool_config,
                subscription,
                handler,
                broker.clone(),
                shutdown.clone(),
            ));
        }

        let relay = OutboxRelay::new(repos.outbox.clone(), broker.clone(), config.outbox.clone())
            .spawn(shutdown.clone());

        let service = DocumentService::new(repos, collaborators.storage);

        tracing::info!(
            pools = pools.len(),
            backend = collaborators.backend.name(),
            "Pipeline started"
        );

        Ok(Self {
            service,
            pools,
            relay,
            shutdown,
        })
    }

    pub fn service(&self) -> &DocumentService {
        &self.service
    }

    /// Cancels in-flight work, drains the pools and makes a last outbox pass. Requests
    /// interrupted here go back to the broker.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down pipeline");
        self.shutdown.cancel();
        for pool in self.pools {
            let name = pool.name();
            pool.join().await;
            tracing::debug!(pool = name, "Worker pool stopped");
        }
        if let Err(e) = self.relay.await {
            tracing::error!(error = %e, "Outbox relay task panicked");
        }
        tracing::info!("Pipeline stopped");
    }
}
