//! Page counting per MIME type.
//!
//! | MIME type | method | rule |
//! |---|---|---|
//! | `application/pdf` | exact | page tree size |
//! | DOCX | estimated | `ceil((paragraphs + 5*tables + 3*images) / 25)`, min 1 |
//! | PPTX | exact | slide count |
//! | `text/plain` | estimated | `ceil(file_size / 3000)`, or chars when size is unknown, min 1 |
//!
//! Anything else is [`CountMethod::Unsupported`], which is not an error.

use serde::Serialize;
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::office::{self, OfficeError, DOCX_MIME, PPTX_MIME};

const CHARS_PER_PAGE: f64 = 3000.0;
const DOCX_UNITS_PER_PAGE: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CountMethod {
    Exact,
    Estimated,
    Unsupported,
}

impl Display for CountMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CountMethod::Exact => write!(f, "EXACT"),
            CountMethod::Estimated => write!(f, "ESTIMATED"),
            CountMethod::Unsupported => write!(f, "UNSUPPORTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageCount {
    pub count: Option<i32>,
    pub method: CountMethod,
    pub file_type: String,
    pub details: Option<String>,
}

impl PageCount {
    pub fn exact(count: usize, file_type: &str) -> Self {
        Self {
            count: Some(clamp_count(count)),
            method: CountMethod::Exact,
            file_type: file_type.to_string(),
            details: None,
        }
    }

    pub fn estimated(count: usize, file_type: &str, details: &str) -> Self {
        Self {
            count: Some(clamp_count(count)),
            method: CountMethod::Estimated,
            file_type: file_type.to_string(),
            details: Some(details.to_string()),
        }
    }

    pub fn unsupported(file_type: impl Into<String>) -> Self {
        Self {
            count: None,
            method: CountMethod::Unsupported,
            file_type: file_type.into(),
            details: None,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.method != CountMethod::Unsupported
    }
}

fn clamp_count(count: usize) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

#[derive(Debug, thiserror::Error)]
pub enum PageCountError {
    #[error("failed to read PDF: {0}")]
    Pdf(String),

    #[error(transparent)]
    Office(#[from] OfficeError),
}

pub struct PageCountInput<'a> {
    pub mime_type: &'a str,
    pub data: &'a [u8],
    /// Stored size in bytes; 0 when unknown.
    pub file_size: i64,
    pub text: &'a str,
}

pub trait PageCounter: Send + Sync {
    fn count(&self, input: &PageCountInput<'_>) -> Result<PageCount, PageCountError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPageCounter;

impl DefaultPageCounter {
    pub fn new() -> Self {
        Self
    }

    fn count_pdf(data: &[u8]) -> Result<usize, PageCountError> {
        let document =
            lopdf::Document::load_mem(data).map_err(|e| PageCountError::Pdf(e.to_string()))?;
        Ok(document.get_pages().len())
    }

    fn estimate_docx(data: &[u8]) -> Result<usize, PageCountError> {
        let stats = office::docx_stats(data)?;
        let units = stats.paragraphs + stats.tables * 5 + stats.images * 3;
        let pages = (units as f64 / DOCX_UNITS_PER_PAGE).ceil() as usize;
        tracing::debug!(
            paragraphs = stats.paragraphs,
            tables = stats.tables,
            images = stats.images,
            pages,
            "Word page estimate"
        );
        Ok(pages.max(1))
    }

    fn estimate_text(file_size: i64, text: &str) -> usize {
        let basis = if file_size > 0 {
            file_size as f64
        } else {
            text.chars().count() as f64
        };
        ((basis / CHARS_PER_PAGE).ceil() as usize).max(1)
    }
}

impl PageCounter for DefaultPageCounter {
    fn count(&self, input: &PageCountInput<'_>) -> Result<PageCount, PageCountError> {
        let mime = input.mime_type.to_lowercase();
        let result = match mime.as_str() {
            "application/pdf" => PageCount::exact(Self::count_pdf(input.data)?, "PDF"),
            DOCX_MIME => PageCount::estimated(
                Self::estimate_docx(input.data)?,
                "Word DOCX",
                "Based on content analysis",
            ),
            PPTX_MIME => PageCount::exact(office::pptx_slide_count(input.data)?, "PowerPoint PPTX"),
            "text/plain" => PageCount::estimated(
                Self::estimate_text(input.file_size, input.text),
                "Text",
                "~3000 chars per page",
            ),
            _ => PageCount::unsupported(mime),
        };
        Ok(result)
    }
}
