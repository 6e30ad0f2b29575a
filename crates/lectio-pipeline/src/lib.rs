//! Lectio pipeline
//!
//! Ingestion stage, AI coordinator and the two generation stages, plus the
//! [`DocumentService`] entry points and [`Pipeline`] wiring that runs them on worker
//! pools.

pub mod app;
pub mod coordinator;
mod deadline;
pub mod generation;
pub mod ingestion;
pub mod service;

pub use app::{Collaborators, Pipeline};
pub use coordinator::{AiCoordinator, RequestOutcome};
pub use generation::{GenerationOutcome, QaGenerationStage, SummarizationStage};
pub use ingestion::{CompletionPublisher, IngestionOutcome, IngestionStage, ProcessingLogRecorder};
pub use service::DocumentService;
