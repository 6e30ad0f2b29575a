//! Anthropic (Claude) generation backend over the Messages API.
//!
//! One chat model serves summaries, question generation and answers, so the
//! per-language model tables are ignored.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::backend::{http_client, Answer, BackendError, Generated, GenerationBackend};

const SERVICE: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
const SUMMARY_MAX_TOKENS: u32 = 1024;
const QUESTIONS_MAX_TOKENS: u32 = 1024;
const ANSWER_MAX_TOKENS: u32 = 512;

#[derive(Clone)]
pub struct AnthropicBackend {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<MessageParam>,
}

#[derive(Debug, Serialize)]
struct MessageParam {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlockResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlockResponse {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

fn summary_prompt(text: &str, language: &str) -> String {
    format!(
        "You are a study assistant. Write a clear, well-structured summary of the following \
         study material for a student preparing for an exam. Cover the main ideas, key \
         concepts and important details, and leave out anything that is not essential. \
         Write the summary in the language with ISO code '{}'.\n\nText:\n{}",
        language, text
    )
}

fn answer_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the question using only the context below. Reply with the answer alone, \
         in one or two sentences.\n\nContext:\n{}\n\nQuestion: {}",
        context, question
    )
}

impl AnthropicBackend {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http_client(timeout)?,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    async fn call_messages(&self, prompt: String, max_tokens: u32) -> Result<String, BackendError> {
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![MessageParam {
                role: "user".to_string(),
                content: vec![ContentBlock::Text { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::transport(SERVICE, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "Anthropic Messages API request failed");
            return Err(BackendError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body: error_text,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::malformed(SERVICE, e.to_string()))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter_map(|b| match b {
                ContentBlockResponse::Text { text } => Some(text),
                ContentBlockResponse::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(BackendError::malformed(SERVICE, "response contained no text"));
        }
        Ok(text)
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        SERVICE
    }

    fn effective_model(&self, _requested: &str) -> String {
        self.model.clone()
    }

    async fn summarize(&self, text: &str, language: &str) -> Result<Generated, BackendError> {
        let summary = self
            .call_messages(summary_prompt(text, language), SUMMARY_MAX_TOKENS)
            .await?;
        Ok(Generated {
            text: summary,
            model: self.model.clone(),
        })
    }

    async fn generate_questions(&self, prompt: &str, _model: &str) -> Result<String, BackendError> {
        self.call_messages(prompt.to_string(), QUESTIONS_MAX_TOKENS)
            .await
    }

    async fn answer(
        &self,
        question: &str,
        context: &str,
        _model: &str,
    ) -> Result<Answer, BackendError> {
        let text = self
            .call_messages(answer_prompt(question, context), ANSWER_MAX_TOKENS)
            .await?;
        Ok(Answer { text, score: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    async fn backend(server: &mockito::ServerGuard) -> AnthropicBackend {
        AnthropicBackend::new(
            "sk-test".to_string(),
            "claude-test".to_string(),
            server.url(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn summarize_sends_messages_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/messages")
            .match_header("x-api-key", "sk-test")
            .match_header("anthropic-version", API_VERSION)
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "claude-test",
                "messages": [{"role": "user"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content":[{"type":"text","text":"  Cells are small.  "}]}"#)
            .create_async()
            .await;

        let generated = backend(&server)
            .await
            .summarize("Cells are the basic unit of life.", "en")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(generated.text, "Cells are small.");
        assert_eq!(generated.model, "claude-test");
    }

    #[tokio::test]
    async fn answers_have_no_score() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/messages")
            .with_status(200)
            .with_body(r#"{"content":[{"type":"text","text":"A lipid bilayer."}]}"#)
            .create_async()
            .await;

        let answer = backend(&server)
            .await
            .answer("What is a membrane?", "context", "ignored")
            .await
            .unwrap();
        assert_eq!(answer.text, "A lipid bilayer.");
        assert_eq!(answer.score, None);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/messages")
            .with_status(529)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = backend(&server)
            .await
            .generate_questions("prompt", "m")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::Status { status: 529, .. }
        ));
    }

    #[tokio::test]
    async fn empty_content_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/messages")
            .with_status(200)
            .with_body(r#"{"content":[]}"#)
            .create_async()
            .await;

        let err = backend(&server)
            .await
            .summarize("text", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MalformedResponse { .. }));
    }
}
