//! Runtime configuration loaded from the environment (and `.env` when present).

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::languages::LanguageModels;
use crate::storage_types::StorageBackend;

/// Which service answers generation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationBackendKind {
    Anthropic,
    HuggingFace,
}

impl FromStr for GenerationBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(GenerationBackendKind::Anthropic),
            "huggingface" | "hf" => Ok(GenerationBackendKind::HuggingFace),
            _ => Err(anyhow::anyhow!("Invalid generation backend: {}", s)),
        }
    }
}

/// Worker pool sizing and deadlines for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub max_workers: usize,
    /// Upper bound on one work item, including all collaborator calls.
    pub item_timeout_secs: u64,
    /// Deliveries of one message before it is dropped as poison.
    pub max_deliveries: u32,
}

impl StageConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    /// Deadline for a stage's own work inside one item: nine tenths of the item
    /// timeout, leaving the rest to persist the outcome and publish its event.
    pub fn work_deadline(&self) -> Duration {
        self.item_timeout() * 9 / 10
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
    pub min_text_length: usize,
    pub confidence_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_text_length: 50,
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_path: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub kind: GenerationBackendKind,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub anthropic_base_url: String,
    pub huggingface_api_token: Option<String>,
    pub huggingface_base_url: String,
    /// Deadline for a single backend HTTP call.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxConfig {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    /// Postgres connection string; in-memory repositories are used when unset.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub storage: StorageConfig,
    pub ingestion: StageConfig,
    pub coordinator: StageConfig,
    pub summarization: StageConfig,
    pub qa: StageConfig,
    pub detection: DetectionConfig,
    /// Deadline for each extraction-side collaborator call (storage, extraction,
    /// detection, page counting).
    pub collaborator_timeout_secs: u64,
    /// Trimmed character count below which no generation is requested.
    pub min_content_length: usize,
    pub desired_question_count: u32,
    pub models: LanguageModels,
    pub backend: BackendConfig,
    pub outbox: OutboxConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn stage_from_env(prefix: &str, workers: usize, timeout_secs: u64) -> StageConfig {
    const MAX_DELIVERIES: u32 = 3;

    StageConfig {
        max_workers: env_or(&format!("{}_MAX_WORKERS", prefix), workers),
        item_timeout_secs: env_or(&format!("{}_TIMEOUT_SECS", prefix), timeout_secs),
        max_deliveries: env_or(&format!("{}_MAX_DELIVERIES", prefix), MAX_DELIVERIES),
    }
}

/// Reads `SUPPORTED_LANGUAGES` plus `GENERATION_MODEL_<LANG>` / `QA_MODEL_<LANG>`
/// overrides on top of the built-in tables.
fn models_from_env() -> LanguageModels {
    let mut models = LanguageModels::default();

    if let Some(list) = env_opt("SUPPORTED_LANGUAGES") {
        models.supported_languages = list
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>();
    }

    let languages: Vec<String> = models.supported_languages.iter().cloned().collect();
    let overrides = |table: &mut HashMap<String, String>, prefix: &str| {
        for lang in &languages {
            if let Some(model) = env_opt(&format!("{}_{}", prefix, lang.to_uppercase())) {
                table.insert(lang.clone(), model);
            }
        }
    };
    overrides(&mut models.generation_models, "GENERATION_MODEL");
    overrides(&mut models.qa_models, "QA_MODEL");

    if let Some(model) = env_opt("SUMMARIZATION_MODEL") {
        models.summarization_model = model;
    }
    models
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        const DB_MAX_CONNECTIONS: u32 = 10;
        const DB_TIMEOUT_SECS: u64 = 30;
        const INGESTION_MAX_WORKERS: usize = 4;
        const INGESTION_TIMEOUT_SECS: u64 = 300;
        const COORDINATOR_MAX_WORKERS: usize = 4;
        const COORDINATOR_TIMEOUT_SECS: u64 = 30;
        const GENERATION_MAX_WORKERS: usize = 2;
        const GENERATION_TIMEOUT_SECS: u64 = 600;
        // question generation plus five answers at the backend deadline, with headroom
        const QA_TIMEOUT_SECS: u64 = 900;
        const COLLABORATOR_TIMEOUT_SECS: u64 = 60;
        const BACKEND_REQUEST_TIMEOUT_SECS: u64 = 120;
        const MIN_CONTENT_LENGTH: usize = 100;
        const DESIRED_QUESTION_COUNT: u32 = 5;
        const OUTBOX_POLL_INTERVAL_MS: u64 = 500;
        const OUTBOX_BATCH_SIZE: i64 = 50;

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .parse::<StorageBackend>()?;

        let defaults = DetectionConfig::default();

        let config = Config {
            environment,
            database_url: env_opt("DATABASE_URL"),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", DB_TIMEOUT_SECS),
            storage: StorageConfig {
                backend: storage_backend,
                local_path: env_opt("LOCAL_STORAGE_PATH").or_else(|| Some("./data".to_string())),
                s3_bucket: env_opt("S3_BUCKET"),
                s3_region: env_opt("S3_REGION").or_else(|| env_opt("AWS_REGION")),
                s3_endpoint: env_opt("S3_ENDPOINT"),
            },
            ingestion: stage_from_env("INGESTION", INGESTION_MAX_WORKERS, INGESTION_TIMEOUT_SECS),
            coordinator: stage_from_env(
                "COORDINATOR",
                COORDINATOR_MAX_WORKERS,
                COORDINATOR_TIMEOUT_SECS,
            ),
            summarization: stage_from_env(
                "SUMMARIZATION",
                GENERATION_MAX_WORKERS,
                GENERATION_TIMEOUT_SECS,
            ),
            qa: stage_from_env("QA", GENERATION_MAX_WORKERS, QA_TIMEOUT_SECS),
            detection: DetectionConfig {
                min_text_length: env_or("LANGUAGE_MIN_TEXT_LENGTH", defaults.min_text_length),
                confidence_threshold: env_or(
                    "LANGUAGE_CONFIDENCE_THRESHOLD",
                    defaults.confidence_threshold,
                ),
            },
            collaborator_timeout_secs: env_or(
                "COLLABORATOR_TIMEOUT_SECS",
                COLLABORATOR_TIMEOUT_SECS,
            ),
            min_content_length: env_or("MIN_CONTENT_LENGTH", MIN_CONTENT_LENGTH),
            desired_question_count: env_or("DESIRED_QUESTION_COUNT", DESIRED_QUESTION_COUNT),
            models: models_from_env(),
            backend: BackendConfig {
                kind: env::var("GENERATION_BACKEND")
                    .unwrap_or_else(|_| "huggingface".to_string())
                    .parse()?,
                anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
                anthropic_model: env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string()),
                anthropic_base_url: env::var("ANTHROPIC_BASE_URL")
                    .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string()),
                huggingface_api_token: env_opt("HUGGINGFACE_API_TOKEN"),
                huggingface_base_url: env::var("HUGGINGFACE_API_URL").unwrap_or_else(|_| {
                    "https://api-inference.huggingface.co/models".to_string()
                }),
                request_timeout_secs: env_or(
                    "BACKEND_REQUEST_TIMEOUT_SECS",
                    BACKEND_REQUEST_TIMEOUT_SECS,
                ),
            },
            outbox: OutboxConfig {
                poll_interval_ms: env_or("OUTBOX_POLL_INTERVAL_MS", OUTBOX_POLL_INTERVAL_MS),
                batch_size: env_or("OUTBOX_BATCH_SIZE", OUTBOX_BATCH_SIZE),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        for (name, stage) in [
            ("INGESTION", &self.ingestion),
            ("COORDINATOR", &self.coordinator),
            ("SUMMARIZATION", &self.summarization),
            ("QA", &self.qa),
        ] {
            if stage.max_workers == 0 {
                return Err(anyhow::anyhow!("{}_MAX_WORKERS must be at least 1", name));
            }
            if stage.item_timeout_secs == 0 {
                return Err(anyhow::anyhow!("{}_TIMEOUT_SECS must be at least 1", name));
            }
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow::anyhow!(
                "LANGUAGE_CONFIDENCE_THRESHOLD must be between 0 and 1"
            ));
        }

        if self.desired_question_count == 0 {
            return Err(anyhow::anyhow!("DESIRED_QUESTION_COUNT must be at least 1"));
        }

        let backend_timeout = self.backend_timeout();
        if self.summarization.work_deadline() < backend_timeout {
            return Err(anyhow::anyhow!(
                "SUMMARIZATION_TIMEOUT_SECS is too short for one backend call of {}s",
                self.backend.request_timeout_secs
            ));
        }
        let qa_calls = 1 + self.desired_question_count;
        if self.qa.work_deadline() < backend_timeout * qa_calls {
            return Err(anyhow::anyhow!(
                "QA_TIMEOUT_SECS is too short for {} backend calls of {}s each",
                qa_calls,
                self.backend.request_timeout_secs
            ));
        }

        if self.models.supported_languages.is_empty() {
            return Err(anyhow::anyhow!("SUPPORTED_LANGUAGES cannot be empty"));
        }

        match self.storage.backend {
            StorageBackend::S3 if self.storage.s3_bucket.is_none() => {
                return Err(anyhow::anyhow!(
                    "S3_BUCKET must be set when STORAGE_BACKEND=s3"
                ));
            }
            _ => {}
        }

        let is_production = matches!(
            self.environment.to_lowercase().as_str(),
            "production" | "prod"
        );
        let missing_credentials = match self.backend.kind {
            GenerationBackendKind::Anthropic => self.backend.anthropic_api_key.is_none(),
            GenerationBackendKind::HuggingFace => self.backend.huggingface_api_token.is_none(),
        };
        if is_production && missing_credentials {
            return Err(anyhow::anyhow!(
                "Generation backend credentials must be set in production"
            ));
        }

        Ok(())
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    /// Configuration with built-in defaults and in-memory backends, independent of the
    /// process environment.
    pub fn for_tests() -> Self {
        Config {
            environment: "test".to_string(),
            database_url: None,
            db_max_connections: 1,
            db_timeout_seconds: 5,
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                local_path: None,
                s3_bucket: None,
                s3_region: None,
                s3_endpoint: None,
            },
            ingestion: StageConfig {
                max_workers: 2,
                item_timeout_secs: 30,
                max_deliveries: 3,
            },
            coordinator: StageConfig {
                max_workers: 2,
                item_timeout_secs: 30,
                max_deliveries: 3,
            },
            summarization: StageConfig {
                max_workers: 2,
                item_timeout_secs: 30,
                max_deliveries: 3,
            },
            qa: StageConfig {
                max_workers: 2,
                item_timeout_secs: 90,
                max_deliveries: 3,
            },
            detection: DetectionConfig::default(),
            collaborator_timeout_secs: 10,
            min_content_length: 100,
            desired_question_count: 5,
            models: LanguageModels::default(),
            backend: BackendConfig {
                kind: GenerationBackendKind::HuggingFace,
                anthropic_api_key: None,
                anthropic_model: "claude-3-5-haiku-latest".to_string(),
                anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
                huggingface_api_token: None,
                huggingface_base_url: "https://api-inference.huggingface.co/models".to_string(),
                request_timeout_secs: 10,
            },
            outbox: OutboxConfig {
                poll_interval_ms: 20,
                batch_size: 50,
            },
        }
    }
}
