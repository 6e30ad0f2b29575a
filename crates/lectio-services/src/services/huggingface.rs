//! Hugging Face Inference API backend.
//!
//! Each task goes to `{base_url}/{model}` with a bearer token. Summaries use a single
//! configured model; question generation and answering use the model chosen per
//! language by the caller.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backend::{http_client, Answer, BackendError, Generated, GenerationBackend};

const SERVICE: &str = "huggingface";

#[derive(Clone)]
pub struct HuggingFaceBackend {
    token: String,
    base_url: String,
    summarization_model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct TextRequest<'a, P: Serialize> {
    inputs: &'a str,
    parameters: P,
}

#[derive(Debug, Serialize)]
struct SummarizationParameters {
    max_length: u32,
    min_length: u32,
    do_sample: bool,
}

#[derive(Debug, Serialize)]
struct GenerationParameters {
    max_new_tokens: u32,
    temperature: f64,
    do_sample: bool,
    return_full_text: bool,
}

#[derive(Debug, Serialize)]
struct QuestionAnsweringRequest<'a> {
    inputs: QuestionAnsweringInputs<'a>,
}

#[derive(Debug, Serialize)]
struct QuestionAnsweringInputs<'a> {
    question: &'a str,
    context: &'a str,
}

#[derive(Debug, Deserialize)]
struct SummaryItem {
    summary_text: String,
}

#[derive(Debug, Deserialize)]
struct GeneratedItem {
    generated_text: String,
}

#[derive(Debug, Deserialize)]
struct QuestionAnsweringResponse {
    answer: String,
    score: Option<f64>,
}

impl HuggingFaceBackend {
    pub fn new(
        token: String,
        base_url: String,
        summarization_model: String,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            token,
            base_url: base_url.trim_end_matches('/').to_string(),
            summarization_model,
            client: http_client(timeout)?,
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/{}", self.base_url, model)
    }

    #[tracing::instrument(skip(self, body), fields(service = SERVICE))]
    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        model: &str,
        body: &B,
    ) -> Result<R, BackendError> {
        let response = self
            .client
            .post(self.model_url(model))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::transport(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, model = %model, "Hugging Face inference request failed");
            return Err(BackendError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: error_text,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| BackendError::malformed(SERVICE, e.to_string()))
    }
}

#[async_trait]
impl GenerationBackend for HuggingFaceBackend {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn summarize(&self, text: &str, _language: &str) -> Result<Generated, BackendError> {
        let body = TextRequest {
            inputs: text,
            parameters: SummarizationParameters {
                max_length: 150,
                min_length: 30,
                do_sample: false,
            },
        };
        let items: Vec<SummaryItem> = self.post(&self.summarization_model, &body).await?;
        let summary = items
            .into_iter()
            .next()
            .map(|item| item.summary_text.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BackendError::malformed(SERVICE, "empty summarization result"))?;

        Ok(Generated {
            text: summary,
            model: self.summarization_model.clone(),
        })
    }

    async fn generate_questions(&self, prompt: &str, model: &str) -> Result<String, BackendError> {
        let body = TextRequest {
            inputs: prompt,
            parameters: GenerationParameters {
                max_new_tokens: 500,
                temperature: 0.7,
                do_sample: true,
                return_full_text: false,
            },
        };
        let items: Vec<GeneratedItem> = self.post(model, &body).await?;
        items
            .into_iter()
            .next()
            .map(|item| item.generated_text)
            .ok_or_else(|| BackendError::malformed(SERVICE, "empty generation result"))
    }

    async fn answer(
        &self,
        question: &str,
        context: &str,
        model: &str,
    ) -> Result<Answer, BackendError> {
        let body = QuestionAnsweringRequest {
            inputs: QuestionAnsweringInputs { question, context },
        };
        let response: QuestionAnsweringResponse = self.post(model, &body).await?;
        let text = response.answer.trim().to_string();
        if text.is_empty() {
            return Err(BackendError::malformed(SERVICE, "empty answer"));
        }
        Ok(Answer {
            text,
            score: response.score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn backend(server: &mockito::ServerGuard) -> HuggingFaceBackend {
        HuggingFaceBackend::new(
            "hf_test".to_string(),
            format!("{}/models/", server.url()),
            "facebook/bart-large-cnn".to_string(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn summarize_posts_to_summarization_model() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/facebook/bart-large-cnn")
            .match_header("authorization", "Bearer hf_test")
            .match_body(Matcher::Json(json!({
                "inputs": "long text",
                "parameters": {"max_length": 150, "min_length": 30, "do_sample": false}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"summary_text":"short text"}]"#)
            .create_async()
            .await;

        let generated = backend(&server).summarize("long text", "en").await.unwrap();

        mock.assert_async().await;
        assert_eq!(generated.text, "short text");
        assert_eq!(generated.model, "facebook/bart-large-cnn");
    }

    #[tokio::test]
    async fn generate_questions_uses_requested_model() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/google/flan-t5-base")
            .match_body(Matcher::PartialJson(json!({
                "parameters": {"max_new_tokens": 500, "return_full_text": false}
            })))
            .with_status(200)
            .with_body(r#"[{"generated_text":"Q: What is a cell?"}]"#)
            .create_async()
            .await;

        let raw = backend(&server)
            .generate_questions("prompt", "google/flan-t5-base")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(raw, "Q: What is a cell?");
    }

    #[tokio::test]
    async fn answer_reports_score() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/deepset/roberta-base-squad2")
            .match_body(Matcher::Json(json!({
                "inputs": {"question": "What is a cell?", "context": "A cell is a unit."}
            })))
            .with_status(200)
            .with_body(r#"{"answer":"a unit","score":0.42,"start":7,"end":13}"#)
            .create_async()
            .await;

        let answer = backend(&server)
            .answer("What is a cell?", "A cell is a unit.", "deepset/roberta-base-squad2")
            .await
            .unwrap();
        assert_eq!(answer.text, "a unit");
        assert_eq!(answer.score, Some(0.42));
    }

    #[tokio::test]
    async fn loading_model_is_a_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/facebook/bart-large-cnn")
            .with_status(503)
            .with_body(r#"{"error":"Model is currently loading"}"#)
            .create_async()
            .await;

        let err = backend(&server).summarize("text", "en").await.unwrap_err();
        match err {
            BackendError::Status { status, body, .. } => {
                assert_eq!(status, 503);
                assert!(body.contains("loading"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_summary_list_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/facebook/bart-large-cnn")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let err = backend(&server).summarize("text", "en").await.unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse { .. }));
    }
}
