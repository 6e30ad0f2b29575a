//! Lectio CLI: runs the document pipeline and inspects its results.
//!
//! Reads configuration from the environment (and `.env`). Without `DATABASE_URL` all
//! state lives in memory for the lifetime of the command.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lectio_cli::{
    build_collaborators, build_repositories, guess_mime_type, start_pipeline, truncate_text,
    wait_for_document, wait_for_generations,
};
use lectio_core::models::{Document, ProcessingLogEntry, QaRecord, SummaryRecord, Tag};
use lectio_core::Config;
use lectio_infra::{init_telemetry, shutdown_telemetry, LogFormat};
use lectio_pipeline::{DocumentService, Pipeline};
use serde::Serialize;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lectio", about = "Document ingestion and study-material pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage until interrupted
    Run {
        /// Apply database migrations before starting
        #[arg(long)]
        migrate: bool,
    },
    /// Upload a file, process it and print the results. Failed documents are re-run by
    /// ingesting the file again, which creates a new document.
    Ingest {
        /// Path to the file to upload
        file: PathBuf,
        /// Owner UUID (random if omitted)
        #[arg(long)]
        owner: Option<Uuid>,
        /// MIME type (guessed from the extension if omitted)
        #[arg(long)]
        mime: Option<String>,
        /// Seconds to wait for processing and generation
        #[arg(long, default_value = "120")]
        wait: u64,
    },
    /// Show a document with its tags, summary and questions
    Show {
        /// Document UUID
        id: Uuid,
        /// Print full generated text instead of a preview
        #[arg(long)]
        full: bool,
    },
    /// Processing history of a document, or recent errors across all documents
    History {
        /// Document UUID
        id: Option<Uuid>,
        /// List ERROR entries from the last N hours instead
        #[arg(long, conflicts_with = "id")]
        errors_hours: Option<i64>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentReport {
    document: Document,
    tags: Vec<Tag>,
    summary: Option<SummaryRecord>,
    qa: Option<QaRecord>,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

async fn report(
    service: &DocumentService,
    document: Document,
    full: bool,
) -> anyhow::Result<DocumentReport> {
    let tags = service.tags(document.id).await?;
    let mut summary = service.summary_for_document(document.id).await?;
    let mut qa = service.qa_for_document(document.id).await?;
    if !full {
        if let Some(text) = summary.as_mut().and_then(|s| s.summary_text.as_mut()) {
            *text = truncate_text(text, 400);
        }
        if let Some(record) = qa.as_mut() {
            for pair in record.items.iter_mut() {
                pair.answer = truncate_text(&pair.answer, 200);
            }
        }
    }
    Ok(DocumentReport {
        document,
        tags,
        summary,
        qa,
    })
}

/// A service over the configured store without starting any workers.
async fn read_only_service(config: &Config) -> anyhow::Result<DocumentService> {
    let repos = build_repositories(config, false).await?;
    let collaborators = build_collaborators(config).await?;
    Ok(DocumentService::new(repos, collaborators.storage))
}

async fn ingest(
    pipeline: &Pipeline,
    file: PathBuf,
    owner: Option<Uuid>,
    mime: Option<String>,
    wait: Duration,
) -> anyhow::Result<DocumentReport> {
    let data = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("File path has no usable file name")?
        .to_string();
    let mime_type = mime.unwrap_or_else(|| guess_mime_type(&file).to_string());

    let service = pipeline.service();
    let uploaded = service
        .upload(owner.unwrap_or_else(Uuid::new_v4), &filename, &mime_type, data)
        .await?;
    tracing::info!(document_id = %uploaded.id, mime_type = %mime_type, "Submitted");

    let started = tokio::time::Instant::now();
    let document = wait_for_document(service, uploaded.id, wait).await?;
    wait_for_generations(service, document.id, wait.saturating_sub(started.elapsed())).await?;
    report(service, document, false).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_telemetry("lectio", LogFormat::from_env())?;

    let result = match cli.command {
        Commands::Run { migrate } => {
            let pipeline = start_pipeline(&config, migrate).await?;
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            pipeline.shutdown().await;
            Ok(())
        }
        Commands::Ingest {
            file,
            owner,
            mime,
            wait,
        } => {
            let pipeline = start_pipeline(&config, false).await?;
            let outcome = ingest(&pipeline, file, owner, mime, Duration::from_secs(wait)).await;
            pipeline.shutdown().await;
            outcome.and_then(|r| print_json(&r))
        }
        Commands::Show { id, full } => {
            let service = read_only_service(&config).await?;
            let document = service.get(id).await?;
            print_json(&report(&service, document, full).await?)
        }
        Commands::History { id, errors_hours } => {
            let service = read_only_service(&config).await?;
            let entries: Vec<ProcessingLogEntry> = match (id, errors_hours) {
                (Some(id), _) => service.history(id).await?,
                (None, Some(hours)) => service.recent_errors(hours).await?,
                (None, None) => anyhow::bail!("Pass a document id or --errors-hours"),
            };
            print_json(&entries)
        }
    };

    shutdown_telemetry().await;
    result
}
