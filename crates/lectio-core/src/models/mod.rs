pub mod document;
pub mod generation;
pub mod processing_log;
pub mod status;
pub mod tag;

pub use document::{Document, DocumentContent};
pub use generation::{
    DifficultyLevel, GenerationVariant, QaRecord, QuestionAnswer, QuestionType, SummaryOutcome,
    SummaryRecord,
};
pub use processing_log::{ProcessingLogEntry, ProcessingStep, StepStatus};
pub use status::{DocumentStatus, GenerationStatus, TransitionError};
pub use tag::Tag;
