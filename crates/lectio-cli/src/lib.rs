//! Wiring and output helpers for the `lectio` binary.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lectio_core::models::{Document, QaRecord, SummaryRecord};
use lectio_core::Config;
use lectio_db::Repositories;
use lectio_infra::InMemoryBroker;
use lectio_pipeline::{Collaborators, DocumentService, Pipeline};
use lectio_processing::{DefaultPageCounter, DefaultTextExtractor, WhatlangDetector};
use lectio_services::create_backend;
use lectio_storage::create_storage;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Truncate a string to `max_chars` characters, appending "..." if truncated.
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// MIME type for an upload, from its file extension.
pub fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" | "text" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Postgres repositories when `DATABASE_URL` is set, otherwise a process-local store.
pub async fn build_repositories(config: &Config, migrate: bool) -> Result<Repositories> {
    match &config.database_url {
        Some(url) => {
            let pool = lectio_db::connect(config, url).await?;
            if migrate {
                lectio_db::run_migrations(&pool).await?;
            }
            Ok(Repositories::postgres(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, using in-memory repositories");
            Ok(Repositories::in_memory().0)
        }
    }
}

pub async fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let storage = create_storage(&config.storage)
        .await
        .context("Failed to initialize storage")?;
    let backend = create_backend(&config.backend, &config.models)
        .context("Failed to initialize generation backend")?;

    Ok(Collaborators {
        storage,
        extractor: Arc::new(DefaultTextExtractor::new()),
        detector: Arc::new(WhatlangDetector::new(config.detection.clone())),
        page_counter: Arc::new(DefaultPageCounter::new()),
        backend,
    })
}

/// Starts every stage on an in-process broker.
pub async fn start_pipeline(config: &Config, migrate: bool) -> Result<Pipeline> {
    let repos = build_repositories(config, migrate).await?;
    let collaborators = build_collaborators(config).await?;
    Pipeline::start(config, repos, collaborators, Arc::new(InMemoryBroker::new())).await
}

/// Polls until the document reaches COMPLETED or FAILED.
pub async fn wait_for_document(
    service: &DocumentService,
    id: Uuid,
    timeout: Duration,
) -> Result<Document> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let document = service.get(id).await?;
        if document.status.is_terminal() {
            return Ok(document);
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!(
                "Document {} still {} after {}s",
                id,
                document.status,
                timeout.as_secs()
            );
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Polls until both generation records are terminal, or `timeout` elapses. Records that
/// were never requested stay `None`.
pub async fn wait_for_generations(
    service: &DocumentService,
    document_id: Uuid,
    timeout: Duration,
) -> Result<(Option<SummaryRecord>, Option<QaRecord>)> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let summary = service.summary_for_document(document_id).await?;
        let qa = service.qa_for_document(document_id).await?;

        let summary_done = summary.as_ref().map_or(true, |r| r.status.is_terminal());
        let qa_done = qa.as_ref().map_or(true, |r| r.status.is_terminal());
        let requested = summary.is_some() || qa.is_some();

        if (requested && summary_done && qa_done) || tokio::time::Instant::now() >= deadline {
            return Ok((summary, qa));
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_short() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("", 5), "");
        assert_eq!(truncate_text("hello", 5), "hello");
    }

    #[test]
    fn truncate_text_long() {
        assert_eq!(truncate_text("hello world", 8), "hello...");
        assert_eq!(truncate_text("abc", 2), "...");
    }

    #[test]
    fn truncate_text_counts_chars() {
        assert_eq!(truncate_text("ééééé", 4), "é...");
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(guess_mime_type(Path::new("notes.TXT")), "text/plain");
        assert!(guess_mime_type(Path::new("a/b/slides.pptx")).ends_with("presentation"));
        assert_eq!(guess_mime_type(Path::new("paper.pdf")), "application/pdf");
        assert_eq!(guess_mime_type(Path::new("noext")), "application/octet-stream");
    }
}
