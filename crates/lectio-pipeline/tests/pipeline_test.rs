//! End-to-end runs of the pipeline over in-memory repositories, storage and broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lectio_core::events::{
    topics, DocumentIngestionRequested, DocumentProcessingCompleted, Envelope,
    QaGenerationCompleted, QaGenerationRequested, SummarizationCompleted, SummarizationRequested,
};
use lectio_core::models::{Document, DocumentStatus, ProcessingStep, StepStatus, Tag};
use lectio_core::{AppError, Config, DetectionConfig};
use lectio_db::{
    DocumentRepositoryTrait, InMemoryStore, OutboxMessage, Repositories, TagRepositoryTrait,
};
use lectio_infra::{InMemoryBroker, MessageBroker};
use lectio_pipeline::{Collaborators, IngestionOutcome, IngestionStage, Pipeline};
use lectio_pipeline::{CompletionPublisher, ProcessingLogRecorder};
use lectio_processing::{
    DefaultPageCounter, DefaultTextExtractor, LanguageDetection, LanguageDetector,
    WhatlangDetector,
};
use lectio_services::{Answer, BackendError, Generated, GenerationBackend};
use lectio_storage::{MemoryStorage, Storage};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(10);

const ENGLISH: &str = "The cell is the basic structural and functional unit of every living \
organism. Cells contain genetic material, which is copied and passed on whenever a cell \
divides. Mitochondria release energy from food through respiration, while the nucleus \
controls the activities of the cell and stores its chromosomes. Plant cells also have a \
rigid wall and chloroplasts that capture light for photosynthesis. ";

const GERMAN: &str = "Die Zelle ist die kleinste lebende Einheit aller Organismen. Jede Zelle \
enthält Erbinformationen, die bei der Teilung an die Tochterzellen weitergegeben werden. \
Die Mitochondrien liefern die Energie, und der Zellkern steuert die Vorgänge in der Zelle. ";

/// Summaries are the first sentence; questions are fixed.
struct StudyBackend;

#[async_trait]
impl GenerationBackend for StudyBackend {
    fn name(&self) -> &'static str {
        "study"
    }

    async fn summarize(&self, text: &str, _language: &str) -> Result<Generated, BackendError> {
        let first = text.split_inclusive(". ").next().unwrap_or(text).trim();
        Ok(Generated {
            text: first.to_string(),
            model: "study-summarizer".to_string(),
        })
    }

    async fn generate_questions(&self, _prompt: &str, _model: &str) -> Result<String, BackendError> {
        Ok("Q: 1. What is the basic unit of life?\nQ: 2. How do cells divide?\n\
            Q: 3. Why do plant cells have chloroplasts?"
            .to_string())
    }

    async fn answer(
        &self,
        _question: &str,
        _context: &str,
        _model: &str,
    ) -> Result<Answer, BackendError> {
        Ok(Answer {
            text: "the cell".to_string(),
            score: Some(0.6),
        })
    }
}

struct Harness {
    pipeline: Pipeline,
    store: InMemoryStore,
    broker: InMemoryBroker,
}

fn collaborators(storage: Arc<dyn Storage>) -> Collaborators {
    Collaborators {
        storage,
        extractor: Arc::new(DefaultTextExtractor::new()),
        detector: Arc::new(WhatlangDetector::new(DetectionConfig::default())),
        page_counter: Arc::new(DefaultPageCounter::new()),
        backend: Arc::new(StudyBackend),
    }
}

async fn start() -> Harness {
    let (repos, store) = Repositories::in_memory();
    let broker = InMemoryBroker::new();
    let pipeline = Pipeline::start(
        &Config::for_tests(),
        repos,
        collaborators(Arc::new(MemoryStorage::new())),
        Arc::new(broker.clone()),
    )
    .await
    .unwrap();
    Harness {
        pipeline,
        store,
        broker,
    }
}

fn english_text(chars: usize) -> String {
    ENGLISH.repeat(chars / ENGLISH.len() + 1)[..chars].to_string()
}

async fn wait_for_status(harness: &Harness, id: Uuid) -> Document {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let document = harness.pipeline.service().get(id).await.unwrap();
        if document.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            return document;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn steps(entries: &[lectio_core::models::ProcessingLogEntry]) -> Vec<ProcessingStep> {
    entries.iter().map(|e| e.step).collect()
}

#[tokio::test]
async fn english_upload_flows_to_both_generations() {
    let harness = start().await;
    let text = english_text(5000);
    let owner = Uuid::new_v4();

    let uploaded = harness
        .pipeline
        .service()
        .upload(owner, "biology.txt", "text/plain", text.clone().into_bytes())
        .await
        .unwrap();

    let summaries = harness
        .broker
        .wait_for(topics::SUMMARIZATION_COMPLETED, 1, WAIT)
        .await;
    let qa = harness.broker.wait_for(topics::QA_COMPLETED, 1, WAIT).await;

    let document = harness.pipeline.service().get(uploaded.id).await.unwrap();
    assert_eq!(document.status, DocumentStatus::Completed);
    assert_eq!(document.page_count, Some(2));
    assert_eq!(document.language_detected.as_deref(), Some("en"));
    assert!(document.content_hash.is_some());
    assert!(document.processed_at.is_some());

    let completed = harness
        .broker
        .published(topics::DOCUMENT_PROCESSING_COMPLETED)
        .await;
    assert_eq!(completed.len(), 1);
    let completed: DocumentProcessingCompleted = completed[0].decode().unwrap();
    assert_eq!(completed.extracted_text.chars().count(), 5000);

    let requested = harness
        .broker
        .published(topics::SUMMARIZATION_REQUESTED)
        .await;
    assert_eq!(requested.len(), 1);
    let requested: SummarizationRequested = requested[0].decode().unwrap();
    assert_eq!(requested.owner_id, owner);

    let qa_requested = harness.broker.published(topics::QA_REQUESTED).await;
    assert_eq!(qa_requested.len(), 1);
    let qa_requested: QaGenerationRequested = qa_requested[0].decode().unwrap();
    assert_eq!(qa_requested.desired_question_count, 5);

    assert_eq!(summaries.len(), 1);
    let summary: SummarizationCompleted = summaries[0].decode().unwrap();
    assert!(summary.success);
    assert_eq!(summary.original_text_length, 5000);
    let ratio = summary.summary_length as f64 / summary.original_text_length as f64;
    assert!((summary.compression_ratio - ratio).abs() < 1e-12);
    assert_eq!(
        summary.summary_length as usize,
        summary.summary_text.unwrap().chars().count()
    );

    assert_eq!(qa.len(), 1);
    let qa: QaGenerationCompleted = qa[0].decode().unwrap();
    assert!(qa.success);
    assert_eq!(qa.questions_generated, 3);
    assert!(qa
        .items
        .iter()
        .all(|item| (0.75..=1.0).contains(&item.confidence_score)));

    let history = harness
        .pipeline
        .service()
        .history(uploaded.id)
        .await
        .unwrap();
    assert_eq!(
        steps(&history),
        vec![
            ProcessingStep::ProcessingStarted,
            ProcessingStep::TextExtraction,
            ProcessingStep::DocumentHash,
            ProcessingStep::LanguageDetection,
            ProcessingStep::PageCount,
            ProcessingStep::AutoTagging,
            ProcessingStep::ProcessingCompleted,
        ]
    );
    let page_entry = history
        .iter()
        .find(|e| e.step == ProcessingStep::PageCount)
        .unwrap();
    assert_eq!(page_entry.details["pageCount"], 2);
    assert_eq!(page_entry.details["method"], "ESTIMATED");

    harness.pipeline.shutdown().await;
}

#[tokio::test]
async fn redelivered_request_emits_no_second_completion() {
    let harness = start().await;
    harness
        .pipeline
        .service()
        .upload(
            Uuid::new_v4(),
            "biology.txt",
            "text/plain",
            english_text(1200).into_bytes(),
        )
        .await
        .unwrap();

    harness
        .broker
        .wait_for(topics::SUMMARIZATION_COMPLETED, 1, WAIT)
        .await;
    let original = harness
        .broker
        .published(topics::SUMMARIZATION_REQUESTED)
        .await;
    harness.broker.publish(original[0].clone()).await.unwrap();

    let requested = harness
        .broker
        .wait_for(topics::SUMMARIZATION_REQUESTED, 2, WAIT)
        .await;
    assert_eq!(requested.len(), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        harness
            .broker
            .published(topics::SUMMARIZATION_COMPLETED)
            .await
            .len(),
        1
    );
    assert_eq!(harness.store.summary_count().await, 1);

    harness.pipeline.shutdown().await;
}

#[tokio::test]
async fn short_documents_are_not_sent_for_generation() {
    let harness = start().await;
    let uploaded = harness
        .pipeline
        .service()
        .upload(
            Uuid::new_v4(),
            "note.txt",
            "text/plain",
            b"Cells divide by mitosis.".to_vec(),
        )
        .await
        .unwrap();

    let document = wait_for_status(&harness, uploaded.id).await;
    assert_eq!(document.status, DocumentStatus::Completed);
    harness
        .broker
        .wait_for(topics::DOCUMENT_PROCESSING_COMPLETED, 1, WAIT)
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(harness
        .broker
        .published(topics::SUMMARIZATION_REQUESTED)
        .await
        .is_empty());
    assert!(harness.broker.published(topics::QA_REQUESTED).await.is_empty());
    assert_eq!(harness.store.summary_count().await, 0);
    assert_eq!(harness.store.qa_count().await, 0);

    // too short to detect
    let history = harness.pipeline.service().history(uploaded.id).await.unwrap();
    let language = history
        .iter()
        .find(|e| e.step == ProcessingStep::LanguageDetection)
        .unwrap();
    assert_eq!(language.status, StepStatus::Warning);
    assert_eq!(document.language_detected.as_deref(), Some("unknown"));

    harness.pipeline.shutdown().await;
}

#[tokio::test]
async fn unsupported_language_fails_generation() {
    let harness = start().await;
    harness
        .pipeline
        .service()
        .upload(
            Uuid::new_v4(),
            "zelle.txt",
            "text/plain",
            GERMAN.repeat(3).into_bytes(),
        )
        .await
        .unwrap();

    let summaries = harness
        .broker
        .wait_for(topics::SUMMARIZATION_COMPLETED, 1, WAIT)
        .await;
    let qa = harness.broker.wait_for(topics::QA_COMPLETED, 1, WAIT).await;

    let summary: SummarizationCompleted = summaries[0].decode().unwrap();
    assert!(!summary.success);
    assert!(!summary.error_message.unwrap_or_default().is_empty());

    let qa: QaGenerationCompleted = qa[0].decode().unwrap();
    assert!(!qa.success);
    assert!(!qa.error_message.unwrap_or_default().is_empty());
    assert!(qa.items.is_empty());

    harness.pipeline.shutdown().await;
}

#[tokio::test]
async fn extraction_failure_fails_document_without_events() {
    let harness = start().await;
    let uploaded = harness
        .pipeline
        .service()
        .upload(
            Uuid::new_v4(),
            "blob.bin",
            "application/octet-stream",
            vec![0xff, 0xfe, 0x00, 0x80, 0x81],
        )
        .await
        .unwrap();

    let document = wait_for_status(&harness, uploaded.id).await;
    assert_eq!(document.status, DocumentStatus::Failed);
    assert!(document.processing_error.is_some());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(harness
        .broker
        .published(topics::DOCUMENT_PROCESSING_COMPLETED)
        .await
        .is_empty());
    // only the upload's own ingestion request went through the outbox
    assert!(harness
        .store
        .outbox_messages()
        .await
        .iter()
        .all(|m| m.topic == topics::DOCUMENT_INGESTION_REQUESTED));

    let history = harness.pipeline.service().history(uploaded.id).await.unwrap();
    assert_eq!(
        steps(&history),
        vec![
            ProcessingStep::ProcessingStarted,
            ProcessingStep::TextExtraction,
            ProcessingStep::ProcessingFailed,
        ]
    );
    assert_eq!(history[1].status, StepStatus::Error);
    assert_eq!(history[1].details["errorClass"], "UnsupportedFormat");

    let errors = harness.pipeline.service().recent_errors(1).await.unwrap();
    assert_eq!(errors.len(), 2);

    harness.pipeline.shutdown().await;
}

#[tokio::test]
async fn failed_document_is_never_processed_again() {
    let storage = MemoryStorage::new();
    let (repos, store) = Repositories::in_memory();
    let broker = InMemoryBroker::new();

    let mut document = Document::uploaded(
        Uuid::new_v4(),
        "notes.txt",
        "text/plain",
        10,
        "documents/o/notes.txt",
    );
    document.begin_processing().unwrap();
    document.mark_failed("storage unreachable").unwrap();
    repos.documents.insert(&document).await.unwrap();
    storage
        .put("documents/o/notes.txt", english_text(400).into_bytes())
        .await;

    let pipeline = Pipeline::start(
        &Config::for_tests(),
        repos,
        collaborators(Arc::new(storage)),
        Arc::new(broker.clone()),
    )
    .await
    .unwrap();

    let request = Envelope::wrap(&DocumentIngestionRequested::new(document.id)).unwrap();
    broker.publish(request).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stored = pipeline.service().get(document.id).await.unwrap();
    assert_eq!(stored.status, DocumentStatus::Failed);
    assert_eq!(stored.processing_error.as_deref(), Some("storage unreachable"));
    assert!(stored.extracted_text.is_none());
    assert!(pipeline.service().history(document.id).await.unwrap().is_empty());
    assert!(broker
        .published(topics::DOCUMENT_PROCESSING_COMPLETED)
        .await
        .is_empty());
    assert!(store.outbox_messages().await.is_empty());

    pipeline.shutdown().await;
}

/// Tag store whose writes always fail.
struct BrokenTags;

#[async_trait]
impl TagRepositoryTrait for BrokenTags {
    async fn insert_many(&self, _tags: &[Tag]) -> Result<(), AppError> {
        Err(AppError::Internal("tags table is locked".to_string()))
    }

    async fn list_by_document(&self, _document_id: Uuid) -> Result<Vec<Tag>, AppError> {
        Ok(Vec::new())
    }
}

/// Document store that rejects the next `failures` saves of a FAILED status.
struct FlakyFailureSaves {
    inner: InMemoryStore,
    failures: AtomicUsize,
}

impl FlakyFailureSaves {
    fn new(inner: InMemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl DocumentRepositoryTrait for FlakyFailureSaves {
    async fn insert(&self, document: &Document) -> Result<(), AppError> {
        self.inner.insert(document).await
    }

    async fn insert_with_outbox(
        &self,
        document: &Document,
        message: &OutboxMessage,
    ) -> Result<(), AppError> {
        self.inner.insert_with_outbox(document, message).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, AppError> {
        self.inner.find_by_id(id).await
    }

    async fn save_transition(
        &self,
        document: &Document,
        expected: DocumentStatus,
    ) -> Result<bool, AppError> {
        if document.status == DocumentStatus::Failed
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(AppError::Internal("connection reset".to_string()));
        }
        self.inner.save_transition(document, expected).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        self.inner.delete(id).await
    }
}

/// A stage over `documents` and `tags` with one seeded UPLOADED document.
async fn seeded_stage(
    store: &InMemoryStore,
    documents: Arc<dyn DocumentRepositoryTrait>,
    tags: Arc<dyn TagRepositoryTrait>,
    mime_type: &str,
    data: Vec<u8>,
) -> (IngestionStage, ProcessingLogRecorder, InMemoryBroker, Uuid) {
    let storage = MemoryStorage::new();
    let broker = InMemoryBroker::new();
    let document = Document::uploaded(
        Uuid::new_v4(),
        "notes.txt",
        mime_type,
        data.len() as i64,
        "documents/o/notes.txt",
    );
    store.insert(&document).await.unwrap();
    storage.put("documents/o/notes.txt", data).await;

    let recorder = ProcessingLogRecorder::new(Arc::new(store.clone()));
    let stage = IngestionStage::new(
        documents,
        tags,
        recorder.clone(),
        CompletionPublisher::new(Arc::new(broker.clone())),
        collaborators(Arc::new(storage)),
        Duration::from_secs(5),
    );
    (stage, recorder, broker, document.id)
}

#[tokio::test]
async fn tag_write_failure_fails_document_without_events() {
    let store = InMemoryStore::new();
    let (stage, recorder, broker, id) = seeded_stage(
        &store,
        Arc::new(store.clone()),
        Arc::new(BrokenTags),
        "text/plain",
        english_text(700).into_bytes(),
    )
    .await;

    let outcome = stage.process(id).await.unwrap();
    assert!(matches!(outcome, IngestionOutcome::Failed { ref error } if error.contains("locked")));

    let stored = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Failed);
    assert!(stored.processing_error.unwrap().contains("tags table is locked"));

    let history = recorder.history(id).await.unwrap();
    assert_eq!(
        steps(&history),
        vec![
            ProcessingStep::ProcessingStarted,
            ProcessingStep::TextExtraction,
            ProcessingStep::DocumentHash,
            ProcessingStep::LanguageDetection,
            ProcessingStep::PageCount,
            ProcessingStep::AutoTagging,
            ProcessingStep::ProcessingFailed,
        ]
    );
    assert_eq!(history[5].status, StepStatus::Error);
    assert_eq!(history[5].details["errorClass"], "Internal");
    assert_eq!(history[6].status, StepStatus::Error);
    assert!(broker
        .published(topics::DOCUMENT_PROCESSING_COMPLETED)
        .await
        .is_empty());
}

#[tokio::test]
async fn failed_status_save_is_retried() {
    let store = InMemoryStore::new();
    let documents = Arc::new(FlakyFailureSaves::new(store.clone(), 1));
    let (stage, recorder, _broker, id) = seeded_stage(
        &store,
        documents,
        Arc::new(store.clone()),
        "application/octet-stream",
        vec![0xff, 0xfe, 0x00, 0x80],
    )
    .await;

    let outcome = stage.process(id).await.unwrap();
    assert!(matches!(outcome, IngestionOutcome::Failed { .. }));
    let stored = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Failed);

    let history = recorder.history(id).await.unwrap();
    assert_eq!(history.last().unwrap().step, ProcessingStep::ProcessingFailed);
}

#[tokio::test]
async fn redelivery_finishes_a_failure_that_was_not_saved() {
    let store = InMemoryStore::new();
    let documents = Arc::new(FlakyFailureSaves::new(store.clone(), 3));
    let (stage, recorder, broker, id) = seeded_stage(
        &store,
        documents,
        Arc::new(store.clone()),
        "application/octet-stream",
        vec![0xff, 0xfe, 0x00, 0x80],
    )
    .await;

    assert!(stage.process(id).await.is_err());
    let stuck = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stuck.status, DocumentStatus::Processing);

    let outcome = stage.process(id).await.unwrap();
    assert!(matches!(outcome, IngestionOutcome::Failed { .. }));
    let stored = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.status, DocumentStatus::Failed);
    assert!(stored.processing_error.is_some());

    // the steps ran once and the failure was logged once
    let history = recorder.history(id).await.unwrap();
    assert_eq!(
        steps(&history),
        vec![
            ProcessingStep::ProcessingStarted,
            ProcessingStep::TextExtraction,
            ProcessingStep::ProcessingFailed,
        ]
    );
    assert!(broker
        .published(topics::DOCUMENT_PROCESSING_COMPLETED)
        .await
        .is_empty());
}

/// Detector that panics, standing in for a crashed native library.
struct BrokenDetector;

impl LanguageDetector for BrokenDetector {
    fn detect(&self, _text: &str) -> LanguageDetection {
        panic!("detector crashed")
    }
}

#[tokio::test]
async fn detector_failure_is_a_warning() {
    let (repos, _store) = Repositories::in_memory();
    let storage = MemoryStorage::new();
    let broker = InMemoryBroker::new();
    let broker_handle: Arc<dyn MessageBroker> = Arc::new(broker.clone());

    let document = Document::uploaded(
        Uuid::new_v4(),
        "notes.txt",
        "text/plain",
        700,
        "documents/o/notes.txt",
    );
    repos.documents.insert(&document).await.unwrap();
    storage
        .put("documents/o/notes.txt", english_text(700).into_bytes())
        .await;

    let mut collaborators = collaborators(Arc::new(storage));
    collaborators.detector = Arc::new(BrokenDetector);
    let recorder = ProcessingLogRecorder::new(repos.logs.clone());
    let stage = IngestionStage::new(
        repos.documents.clone(),
        repos.tags.clone(),
        recorder.clone(),
        CompletionPublisher::new(broker_handle),
        collaborators,
        Duration::from_secs(5),
    );

    let outcome = stage.process(document.id).await.unwrap();
    assert_eq!(outcome, IngestionOutcome::Completed { published: true });

    let stored = repos.documents.find_by_id(document.id).await.unwrap().unwrap();
    assert_eq!(stored.language_detected.as_deref(), Some("unknown"));
    assert_eq!(stored.page_count, Some(1));

    let history = recorder.history(document.id).await.unwrap();
    let language = history
        .iter()
        .find(|e| e.step == ProcessingStep::LanguageDetection)
        .unwrap();
    assert_eq!(language.status, StepStatus::Warning);
    assert_eq!(language.details["detectedLanguage"], "unknown");

    let second = stage.process(document.id).await.unwrap();
    assert_eq!(
        second,
        IngestionOutcome::Skipped {
            status: DocumentStatus::Completed
        }
    );
    assert_eq!(
        broker
            .published(topics::DOCUMENT_PROCESSING_COMPLETED)
            .await
            .len(),
        1
    );
}
