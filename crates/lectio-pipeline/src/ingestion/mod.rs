//! Document ingestion: extraction and enrichment of one uploaded document.

pub mod log_recorder;
pub mod publisher;
pub mod stage;

pub use log_recorder::ProcessingLogRecorder;
pub use publisher::CompletionPublisher;
pub use stage::{IngestionOutcome, IngestionStage};
