//! Keyword and file-type tags.

/// A tag proposed by [`generate_tags`], before it is attached to a document.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSuggestion {
    pub label: &'static str,
    pub confidence: f64,
}

const KEYWORD_TAGS: &[(&[&str], &str, f64)] = &[
    (&["contract", "agreement"], "contract", 0.85),
    (&["invoice", "bill"], "financial", 0.90),
    (&["report", "analysis"], "report", 0.80),
];

/// Tags for a document from its MIME type and a case-insensitive keyword scan.
///
/// Matching is plain substring search, so "billion" counts as "bill".
pub fn generate_tags(text: &str, mime_type: &str) -> Vec<TagSuggestion> {
    let mut tags = Vec::new();

    if mime_type.contains("pdf") {
        tags.push(TagSuggestion {
            label: "pdf",
            confidence: 1.00,
        });
    } else if mime_type.contains("word") {
        tags.push(TagSuggestion {
            label: "document",
            confidence: 1.00,
        });
    }

    let lower = text.to_lowercase();
    for (keywords, label, confidence) in KEYWORD_TAGS {
        if keywords.iter().any(|k| lower.contains(*k)) {
            tags.push(TagSuggestion {
                label: *label,
                confidence: *confidence,
            });
        }
    }

    tracing::debug!(tags = tags.len(), "Generated automatic tags");
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(tags: &[TagSuggestion]) -> Vec<&'static str> {
        tags.iter().map(|t| t.label).collect()
    }

    #[test]
    fn pdf_contract_report() {
        let tags = generate_tags(
            "This Agreement includes a quarterly REPORT.",
            "application/pdf",
        );
        assert_eq!(labels(&tags), vec!["pdf", "contract", "report"]);
        assert_eq!(tags[1].confidence, 0.85);
    }

    #[test]
    fn word_documents_get_document_tag() {
        let tags = generate_tags(
            "Invoice #12",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        );
        assert_eq!(labels(&tags), vec!["document", "financial"]);
        assert_eq!(tags[1].confidence, 0.90);
    }

    #[test]
    fn plain_text_without_keywords_has_no_tags() {
        assert!(generate_tags("Cells and tissues", "text/plain").is_empty());
    }
}
