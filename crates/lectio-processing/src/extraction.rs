//! Text extraction from uploaded document bytes.

use crate::office::{self, OfficeError, DOCX_MIME, PPTX_MIME};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Document is empty")]
    Empty,

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("Office document extraction failed: {0}")]
    Office(#[from] OfficeError),

    #[error("Text is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

impl ExtractionError {
    /// Short class name recorded in processing logs.
    pub fn class_name(&self) -> &'static str {
        match self {
            ExtractionError::Empty => "EmptyDocument",
            ExtractionError::UnsupportedFormat(_) => "UnsupportedFormat",
            ExtractionError::Pdf(_) => "PdfExtractionError",
            ExtractionError::Office(_) => "OfficeExtractionError",
            ExtractionError::Encoding(_) => "EncodingError",
        }
    }
}

/// Turns document bytes into plain text.
///
/// Implementations are synchronous and may be CPU heavy; callers run them on a
/// blocking thread.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, mime_type: &str, data: &[u8]) -> Result<String, ExtractionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Pdf,
    Docx,
    Pptx,
    Text,
}

/// Extractor for PDF (`pdf-extract`), DOCX and PPTX (`zip` + `quick-xml`) and UTF-8
/// text. The MIME type picks the format; unknown MIME types fall back to magic bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTextExtractor;

impl DefaultTextExtractor {
    pub fn new() -> Self {
        Self
    }

    fn format_for(mime_type: &str, data: &[u8]) -> Option<Format> {
        let mime = mime_type.to_lowercase();
        match mime.as_str() {
            "application/pdf" => return Some(Format::Pdf),
            DOCX_MIME => return Some(Format::Docx),
            PPTX_MIME => return Some(Format::Pptx),
            m if m.starts_with("text/") => return Some(Format::Text),
            "application/json" | "application/xml" => return Some(Format::Text),
            _ => {}
        }

        if data.starts_with(b"%PDF") {
            Some(Format::Pdf)
        } else if data.starts_with(b"PK\x03\x04") {
            // OOXML container, decided by which part it carries
            if office::docx_text(data).is_ok() {
                Some(Format::Docx)
            } else if office::pptx_slide_count(data).map(|n| n > 0).unwrap_or(false) {
                Some(Format::Pptx)
            } else {
                None
            }
        } else if std::str::from_utf8(data).is_ok() {
            Some(Format::Text)
        } else {
            None
        }
    }

    fn extract_pdf(data: &[u8]) -> Result<String, ExtractionError> {
        // pdf-extract can panic on malformed fonts
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(data)
        })) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(ExtractionError::Pdf(e.to_string())),
            Err(_) => {
                tracing::error!("PDF extraction panicked, likely malformed font or glyph data");
                Err(ExtractionError::Pdf(
                    "extraction panicked on malformed content".to_string(),
                ))
            }
        }
    }

    fn extract_plain(data: &[u8]) -> Result<String, ExtractionError> {
        let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
        Ok(String::from_utf8(data.to_vec())?)
    }
}

impl TextExtractor for DefaultTextExtractor {
    fn extract(&self, mime_type: &str, data: &[u8]) -> Result<String, ExtractionError> {
        if data.is_empty() {
            return Err(ExtractionError::Empty);
        }

        let format = Self::format_for(mime_type, data)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(mime_type.to_string()))?;

        let text = match format {
            Format::Pdf => Self::extract_pdf(data)?,
            Format::Docx => office::docx_text(data)?,
            Format::Pptx => office::pptx_text(data)?,
            Format::Text => Self::extract_plain(data)?,
        };

        tracing::debug!(
            mime_type = %mime_type,
            format = ?format,
            text_length = text.chars().count(),
            "Text extracted"
        );

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::office::fixtures::{docx, paragraph, pptx};

    #[test]
    fn plain_text_passes_through() {
        let text = DefaultTextExtractor
            .extract("text/plain", "Mitochondria are organelles.".as_bytes())
            .unwrap();
        assert_eq!(text, "Mitochondria are organelles.");
    }

    #[test]
    fn plain_text_strips_bom() {
        let text = DefaultTextExtractor
            .extract("text/plain", b"\xEF\xBB\xBFhello")
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            DefaultTextExtractor.extract("text/plain", b""),
            Err(ExtractionError::Empty)
        ));
    }

    #[test]
    fn docx_by_mime_type() {
        let data = docx(&paragraph("Cells divide by mitosis"));
        let text = DefaultTextExtractor.extract(DOCX_MIME, &data).unwrap();
        assert_eq!(text, "Cells divide by mitosis");
    }

    #[test]
    fn docx_sniffed_when_mime_is_generic() {
        let data = docx(&paragraph("Sniffed"));
        let text = DefaultTextExtractor
            .extract("application/octet-stream", &data)
            .unwrap();
        assert_eq!(text, "Sniffed");
    }

    #[test]
    fn pptx_by_mime_type() {
        let data = pptx(&["Intro", "Summary"]);
        let text = DefaultTextExtractor.extract(PPTX_MIME, &data).unwrap();
        assert!(text.contains("Intro"));
        assert!(text.contains("Summary"));
    }

    #[test]
    fn corrupt_pdf_fails() {
        let err = DefaultTextExtractor
            .extract("application/pdf", b"%PDF-1.4 not really a pdf")
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Pdf(_)));
        assert_eq!(err.class_name(), "PdfExtractionError");
    }

    #[test]
    fn binary_with_unknown_mime_is_unsupported() {
        let err = DefaultTextExtractor
            .extract("application/octet-stream", &[0xD0, 0xCF, 0x11, 0xE0, 0xFF, 0xFE])
            .unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
    }
}
