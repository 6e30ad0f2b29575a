use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lectio_core::events::{Envelope, QaGenerationCompleted, QaGenerationRequested};
use lectio_core::models::{GenerationStatus, QaRecord, QuestionAnswer};
use lectio_core::{AppError, LanguageModels, TaskError, TaskResultExt};
use lectio_db::GenerationRepositoryTrait;
use lectio_infra::MessageBroker;
use lectio_services::GenerationBackend;
use lectio_worker::MessageHandler;
use tokio_util::sync::CancellationToken;

use super::parse::{
    build_prompt, classify_question, confidence_from_score, difficulty_for, parse_questions,
};
use super::{
    call_backend, elapsed_ms, left_for_redelivery, log_failure, publish_completion,
    supported_language, GenerationOutcome, RECORD_NOT_FOUND,
};
use crate::deadline::with_deadline;

/// Items generated for one request, with the model recorded for them.
struct GeneratedSet {
    model_used: String,
    items: Vec<QuestionAnswer>,
}

#[derive(Clone)]
pub struct QaGenerationStage {
    generations: Arc<dyn GenerationRepositoryTrait>,
    backend: Arc<dyn GenerationBackend>,
    broker: Arc<dyn MessageBroker>,
    models: LanguageModels,
    backend_timeout: Duration,
    /// Bound on generating and answering all questions of one request. Shorter than the
    /// worker item timeout so a slow request still ends FAILED with its event published.
    stage_timeout: Duration,
}

impl QaGenerationStage {
    pub fn new(
        generations: Arc<dyn GenerationRepositoryTrait>,
        backend: Arc<dyn GenerationBackend>,
        broker: Arc<dyn MessageBroker>,
        models: LanguageModels,
        backend_timeout: Duration,
        stage_timeout: Duration,
    ) -> Self {
        Self {
            generations,
            backend,
            broker,
            models,
            backend_timeout,
            stage_timeout,
        }
    }

    async fn load_record(&self, request: &QaGenerationRequested) -> Result<Option<QaRecord>, AppError> {
        match self.generations.find_qa(request.qa_record_id).await? {
            Some(record) => Ok(Some(record)),
            None => self.generations.find_qa_by_document(request.document_id).await,
        }
    }

    /// Generates and answers questions for one document and publishes `qa.completed`.
    #[tracing::instrument(
        skip(self, request, cancel),
        fields(document_id = %request.document_id, qa_id = %request.qa_record_id)
    )]
    pub async fn process(
        &self,
        request: &QaGenerationRequested,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, AppError> {
        let started = Instant::now();

        let record = match self.load_record(request).await? {
            Some(record) => record,
            None => {
                tracing::error!("Q&A record not found");
                let event = QaGenerationCompleted::failed(request, RECORD_NOT_FOUND, 0);
                publish_completion(&self.broker, &event).await;
                return Ok(GenerationOutcome::MissingRecord);
            }
        };
        if record.status.is_terminal() {
            tracing::info!(status = %record.status, "Q&A already processed, skipping");
            return Ok(GenerationOutcome::Duplicate {
                status: record.status,
            });
        }

        let request = QaGenerationRequested {
            qa_record_id: record.id,
            ..request.clone()
        };

        tracing::info!(
            text_length = request.extracted_text.chars().count(),
            desired_question_count = request.desired_question_count,
            backend = self.backend.name(),
            "Starting Q&A generation"
        );

        let generated = with_deadline(
            "Q&A generation",
            self.stage_timeout,
            self.generate(&request, cancel),
        )
        .await;
        match generated {
            Ok(set) => self.complete(record, &request, set, started).await,
            Err(e @ AppError::Cancelled(_)) => Err(left_for_redelivery("qa", e)),
            Err(e) => self.fail(record, &request, e, started).await,
        }
    }

    async fn generate(
        &self,
        request: &QaGenerationRequested,
        cancel: &CancellationToken,
    ) -> Result<GeneratedSet, AppError> {
        let language = supported_language(&self.models, request.language_detected.as_deref())?;
        let context = request.extracted_text.as_str();
        if context.trim().is_empty() {
            return Err(AppError::InvalidInput("document text is empty".to_string()));
        }

        let generation_model = self.models.generation_model(&language);
        let qa_model = self.models.qa_model(&language);

        let prompt = build_prompt(context, request.desired_question_count);
        let raw = call_backend(
            "question generation",
            self.backend_timeout,
            cancel,
            self.backend.generate_questions(&prompt, generation_model),
        )
        .await?;

        let questions = parse_questions(&raw);
        tracing::debug!(
            parsed = questions.len(),
            model = %generation_model,
            "Parsed generated questions"
        );

        let mut items = Vec::with_capacity(questions.len());
        for question in questions {
            let answer = match call_backend(
                "question answering",
                self.backend_timeout,
                cancel,
                self.backend.answer(&question, context, qa_model),
            )
            .await
            {
                Ok(answer) => answer,
                Err(AppError::Cancelled(reason)) => return Err(AppError::Cancelled(reason)),
                Err(e) => {
                    tracing::warn!(question = %question, error = %e, "Could not answer question, skipping");
                    continue;
                }
            };

            let question_type = classify_question(&question);
            items.push(QuestionAnswer {
                difficulty_level: difficulty_for(question_type, &question),
                question_type,
                confidence_score: confidence_from_score(answer.score),
                answer: answer.text,
                question,
            });
        }

        Ok(GeneratedSet {
            model_used: self.backend.effective_model(generation_model),
            items,
        })
    }

    async fn complete(
        &self,
        record: QaRecord,
        request: &QaGenerationRequested,
        set: GeneratedSet,
        started: Instant,
    ) -> Result<GenerationOutcome, AppError> {
        let processing_time_ms = elapsed_ms(started);
        let mut updated = record;
        updated.complete(set.model_used.clone(), set.items.clone(), processing_time_ms)?;
        if !self.generations.save_qa(&updated, GenerationStatus::Requested).await? {
            return self.lost_race(request).await;
        }

        tracing::info!(
            model = %set.model_used,
            questions_generated = set.items.len(),
            processing_time_ms,
            "Q&A generation completed"
        );
        let event =
            QaGenerationCompleted::succeeded(request, set.model_used, set.items, processing_time_ms);
        publish_completion(&self.broker, &event).await;
        Ok(GenerationOutcome::Completed)
    }

    async fn fail(
        &self,
        record: QaRecord,
        request: &QaGenerationRequested,
        error: AppError,
        started: Instant,
    ) -> Result<GenerationOutcome, AppError> {
        let message = error.to_string();
        let processing_time_ms = elapsed_ms(started);
        log_failure("qa", &error);

        let mut updated = record;
        updated.fail(message.clone(), processing_time_ms)?;
        if !self.generations.save_qa(&updated, GenerationStatus::Requested).await? {
            return self.lost_race(request).await;
        }

        let event = QaGenerationCompleted::failed(request, message.clone(), processing_time_ms);
        publish_completion(&self.broker, &event).await;
        Ok(GenerationOutcome::Failed { error: message })
    }

    async fn lost_race(&self, request: &QaGenerationRequested) -> Result<GenerationOutcome, AppError> {
        let status = self
            .generations
            .find_qa(request.qa_record_id)
            .await?
            .map(|r| r.status)
            .unwrap_or(GenerationStatus::Failed);
        tracing::warn!(status = %status, "Q&A record finished concurrently");
        Ok(GenerationOutcome::Duplicate { status })
    }
}

#[async_trait]
impl MessageHandler for QaGenerationStage {
    fn name(&self) -> &'static str {
        "qa"
    }

    async fn handle(&self, envelope: &Envelope, cancel: CancellationToken) -> Result<(), TaskError> {
        let request: QaGenerationRequested = envelope.decode().unrecoverable()?;
        self.process(&request, &cancel).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::ScriptedBackend;
    use lectio_core::events::{topics, DocumentProcessingCompleted};
    use lectio_core::models::{Document, DifficultyLevel, QuestionType};
    use lectio_db::{InMemoryStore, OutboxMessage};
    use lectio_infra::InMemoryBroker;
    use lectio_worker::{WorkerPool, WorkerPoolConfig};
    use uuid::Uuid;

    const TEXT: &str = "Cells are the basic unit of life. They divide by mitosis. \
                        Mitochondria produce ATP for the cell.";

    fn stage(store: &InMemoryStore, broker: &InMemoryBroker, backend: Arc<ScriptedBackend>) -> QaGenerationStage {
        QaGenerationStage::new(
            Arc::new(store.clone()),
            backend,
            Arc::new(broker.clone()),
            LanguageModels::default(),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
    }

    async fn seed(store: &InMemoryStore, language: &str) -> QaGenerationRequested {
        let mut doc = Document::uploaded(Uuid::new_v4(), "cells.txt", "text/plain", 90, "k");
        doc.extracted_text = Some(TEXT.to_string());
        doc.language_detected = Some(language.to_string());
        let source = DocumentProcessingCompleted::from(&doc);
        let record = QaRecord::requested(doc.id, doc.owner_id);
        let request = QaGenerationRequested::for_record(&source, record.id, 5);
        store
            .create_qa_with_outbox(&record, &OutboxMessage::from_event(&request).unwrap())
            .await
            .unwrap();
        request
    }

    async fn completions(broker: &InMemoryBroker) -> Vec<QaGenerationCompleted> {
        broker
            .published(topics::QA_COMPLETED)
            .await
            .iter()
            .map(|e| e.decode().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn answers_parsed_questions() {
        let store = InMemoryStore::new();
        let broker = InMemoryBroker::new();
        let backend = Arc::new(ScriptedBackend {
            questions: Some(
                "Q: 1. What is the basic unit of life?\nQ: 2. How do cells divide?\n\
                 Q: 3. Why is this unanswerable here?"
                    .to_string(),
            ),
            answer_score: Some(0.8),
            ..Default::default()
        });
        let stage = stage(&store, &broker, backend.clone());
        let request = seed(&store, "en-US").await;

        let outcome = stage.process(&request, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Completed);

        let events = completions(&broker).await;
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert!(event.success);
        assert_eq!(event.questions_generated, 2);
        assert_eq!(event.model_used.as_deref(), Some("google/flan-t5-base"));

        let first = &event.items[0];
        assert_eq!(first.question, "What is the basic unit of life?");
        assert_eq!(first.question_type, QuestionType::Factual);
        assert_eq!(first.difficulty_level, DifficultyLevel::Easy);
        assert!((first.confidence_score - 0.95).abs() < 1e-9);
        assert_eq!(event.items[1].question_type, QuestionType::Procedural);

        let record = store.find_qa(request.qa_record_id).await.unwrap().unwrap();
        assert_eq!(record.status, GenerationStatus::Completed);
        assert_eq!(record.questions_generated, Some(2));
    }

    #[tokio::test]
    async fn unsupported_language_is_a_handled_failure() {
        let store = InMemoryStore::new();
        let broker = InMemoryBroker::new();
        let backend = Arc::new(ScriptedBackend::default());
        let stage = stage(&store, &broker, backend.clone());
        let request = seed(&store, "de").await;

        let outcome = stage.process(&request, &CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, GenerationOutcome::Failed { .. }));
        assert_eq!(backend.calls(), 0);

        let events = completions(&broker).await;
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert!(!events[0].error_message.as_deref().unwrap_or("").is_empty());
    }

    #[tokio::test]
    async fn cancellation_leaves_record_for_redelivery() {
        let store = InMemoryStore::new();
        let broker = InMemoryBroker::new();
        let backend = Arc::new(ScriptedBackend {
            questions: Some("Q: What is a cell membrane?".to_string()),
            delay: Some(Duration::from_secs(10)),
            ..Default::default()
        });
        let stage = stage(&store, &broker, backend);
        let request = seed(&store, "en").await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = stage.process(&request, &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled(_)));

        let record = store.find_qa(request.qa_record_id).await.unwrap().unwrap();
        assert_eq!(record.status, GenerationStatus::Requested);
        assert!(completions(&broker).await.is_empty());
    }

    #[tokio::test]
    async fn slow_answers_fail_before_the_item_timeout() {
        let store = InMemoryStore::new();
        let broker = InMemoryBroker::new();
        let backend = Arc::new(ScriptedBackend {
            questions: Some(
                "Q: 1. What is a cell?\nQ: 2. What is DNA?\nQ: 3. What is ATP?\n\
                 Q: 4. What is a ribosome?\nQ: 5. What is a gene?"
                    .to_string(),
            ),
            answer_delay: Some(Duration::from_millis(150)),
            ..Default::default()
        });
        // every answer fits the backend deadline, five of them do not fit the stage
        let stage = QaGenerationStage::new(
            Arc::new(store.clone()),
            backend,
            Arc::new(broker.clone()),
            LanguageModels::default(),
            Duration::from_secs(2),
            Duration::from_millis(400),
        );
        let request = seed(&store, "en").await;

        let subscription = broker.subscribe(topics::QA_REQUESTED).await.unwrap();
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::spawn(
            WorkerPoolConfig {
                max_workers: 1,
                item_timeout: Duration::from_secs(1),
                max_deliveries: 3,
                retry_base_delay: Duration::from_millis(10),
            },
            subscription,
            Arc::new(stage),
            Arc::new(broker.clone()),
            shutdown.clone(),
        );
        broker.publish(Envelope::wrap(&request).unwrap()).await.unwrap();

        let completed = broker
            .wait_for(topics::QA_COMPLETED, 1, Duration::from_secs(3))
            .await;
        // outlast the item timeout so a redelivery would have shown up
        tokio::time::sleep(Duration::from_millis(1200)).await;
        shutdown.cancel();
        pool.join().await;

        assert_eq!(completed.len(), 1);
        let event: QaGenerationCompleted = completed[0].decode().unwrap();
        assert!(!event.success);
        assert!(event.error_message.unwrap().contains("timed out"));
        assert_eq!(completions(&broker).await.len(), 1);
        assert_eq!(broker.published(topics::QA_REQUESTED).await.len(), 1);

        let record = store.find_qa(request.qa_record_id).await.unwrap().unwrap();
        assert_eq!(record.status, GenerationStatus::Failed);
    }

    #[tokio::test]
    async fn terminal_record_is_not_generated_again() {
        let store = InMemoryStore::new();
        let broker = InMemoryBroker::new();
        let backend = Arc::new(ScriptedBackend {
            questions: Some("Q: What is the basic unit of life?".to_string()),
            ..Default::default()
        });
        let stage = stage(&store, &broker, backend.clone());
        let request = seed(&store, "en").await;
        let cancel = CancellationToken::new();

        stage.process(&request, &cancel).await.unwrap();
        let again = stage.process(&request, &cancel).await.unwrap();

        assert!(matches!(again, GenerationOutcome::Duplicate { .. }));
        assert_eq!(backend.calls(), 1);
        assert_eq!(completions(&broker).await.len(), 1);
    }
}
