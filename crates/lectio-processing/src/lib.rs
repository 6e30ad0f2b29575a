//! Lectio document processing
//!
//! Synchronous collaborators used by the ingestion stage: text extraction, content
//! hashing, language detection, page counting and keyword tagging. Extraction,
//! detection and page counting sit behind traits so the pipeline can substitute them
//! in tests.

pub mod extraction;
pub mod hashing;
pub mod language;
pub mod office;
pub mod page_count;
pub mod tagging;

pub use extraction::{DefaultTextExtractor, ExtractionError, TextExtractor};
pub use hashing::content_hash;
pub use language::{LanguageDetection, LanguageDetector, WhatlangDetector, UNKNOWN_LANGUAGE};
pub use page_count::{
    CountMethod, DefaultPageCounter, PageCount, PageCountError, PageCountInput, PageCounter,
};
pub use tagging::{generate_tags, TagSuggestion};
