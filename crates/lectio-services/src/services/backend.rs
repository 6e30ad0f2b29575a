//! Generation backend abstraction.

use async_trait::async_trait;
use lectio_core::{BackendConfig, GenerationBackendKind, LanguageModels};
use std::sync::Arc;
use std::time::Duration;

use super::anthropic::AnthropicBackend;
use super::huggingface::HuggingFaceBackend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend not configured: {0}")]
    NotConfigured(String),

    #[error("request to {service} failed: {message}")]
    Transport { service: &'static str, message: String },

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("malformed response from {service}: {message}")]
    MalformedResponse { service: &'static str, message: String },
}

impl BackendError {
    pub(crate) fn transport(service: &'static str, e: reqwest::Error) -> Self {
        BackendError::Transport {
            service,
            message: e.to_string(),
        }
    }

    pub(crate) fn malformed(service: &'static str, message: impl Into<String>) -> Self {
        BackendError::MalformedResponse {
            service,
            message: message.into(),
        }
    }
}

/// Text produced by a backend, with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    /// Extractive QA models report a score in [0, 1]; chat models report none.
    pub score: Option<f64>,
}

/// A service that summarizes text, writes questions and answers them.
///
/// Calls carry no deadline of their own beyond the HTTP client timeout; callers wrap
/// them in `tokio::time::timeout`.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Model recorded for a call that asked for `requested`. Backends that ignore the
    /// per-language model tables report their own model.
    fn effective_model(&self, requested: &str) -> String {
        requested.to_string()
    }

    async fn summarize(&self, text: &str, language: &str) -> Result<Generated, BackendError>;

    /// Raw completion for a question-generation prompt.
    async fn generate_questions(&self, prompt: &str, model: &str) -> Result<String, BackendError>;

    async fn answer(
        &self,
        question: &str,
        context: &str,
        model: &str,
    ) -> Result<Answer, BackendError>;
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::NotConfigured(format!("failed to create HTTP client: {}", e)))
}

/// Builds the backend selected by `GENERATION_BACKEND`.
pub fn create_backend(
    config: &BackendConfig,
    models: &LanguageModels,
) -> Result<Arc<dyn GenerationBackend>, BackendError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    match config.kind {
        GenerationBackendKind::Anthropic => {
            let api_key = config.anthropic_api_key.clone().ok_or_else(|| {
                BackendError::NotConfigured("ANTHROPIC_API_KEY is not set".to_string())
            })?;
            let backend = AnthropicBackend::new(
                api_key,
                config.anthropic_model.clone(),
                config.anthropic_base_url.clone(),
                timeout,
            )?;
            tracing::info!(model = %config.anthropic_model, "Using Anthropic generation backend");
            Ok(Arc::new(backend))
        }
        GenerationBackendKind::HuggingFace => {
            let token = config.huggingface_api_token.clone().ok_or_else(|| {
                BackendError::NotConfigured("HUGGINGFACE_API_TOKEN is not set".to_string())
            })?;
            let backend = HuggingFaceBackend::new(
                token,
                config.huggingface_base_url.clone(),
                models.summarization_model.clone(),
                timeout,
            )?;
            tracing::info!(
                summarization_model = %models.summarization_model,
                "Using Hugging Face generation backend"
            );
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(kind: GenerationBackendKind) -> BackendConfig {
        BackendConfig {
            kind,
            anthropic_api_key: None,
            anthropic_model: "claude-3-5-haiku-latest".to_string(),
            anthropic_base_url: "http://localhost:1".to_string(),
            huggingface_api_token: None,
            huggingface_base_url: "http://localhost:1".to_string(),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let models = LanguageModels::default();
        for kind in [
            GenerationBackendKind::Anthropic,
            GenerationBackendKind::HuggingFace,
        ] {
            let err = create_backend(&config(kind), &models).err().unwrap();
            assert!(matches!(err, BackendError::NotConfigured(_)));
        }
    }

    #[test]
    fn selects_configured_backend() {
        let models = LanguageModels::default();
        let mut cfg = config(GenerationBackendKind::HuggingFace);
        cfg.huggingface_api_token = Some("hf_token".to_string());
        assert_eq!(create_backend(&cfg, &models).unwrap().name(), "huggingface");

        let mut cfg = config(GenerationBackendKind::Anthropic);
        cfg.anthropic_api_key = Some("sk-test".to_string());
        let backend = create_backend(&cfg, &models).unwrap();
        assert_eq!(backend.name(), "anthropic");
        assert_eq!(
            backend.effective_model("google/flan-t5-base"),
            "claude-3-5-haiku-latest"
        );
    }
}
