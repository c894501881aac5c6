//! Chat model providers for answer synthesis.
//!
//! [`ChatModel`] mirrors the shape of [`crate::embedding::EmbeddingProvider`]:
//! one remote backend ([`OpenAiChat`], chat completions with retry and
//! backoff), one local stand-in ([`EchoChat`], deterministic, dev/test), and
//! [`DisabledChat`] for the unconfigured state.
//!
//! [`build_rag_prompt`] renders the grounding prompt: retrieved context
//! first, then the question, with an explicit instruction to admit not
//! knowing rather than invent.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{RagError, Result};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// A backend that produces an answer string for a fully rendered prompt.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Instantiates the chat model named by the configuration.
pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChat)),
        "echo" => Ok(Box::new(EchoChat)),
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        other => Err(RagError::Config(format!("unknown llm provider: {other}"))),
    }
}

/// Renders the retrieval-grounded prompt from context passages and a question.
pub fn build_rag_prompt(context: &[String], question: &str) -> String {
    format!(
        "Use the following pieces of context to answer the question at the end.\n\
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
         {}\n\n\
         Question: {}\n\
         Answer: ",
        context.join("\n\n"),
        question
    )
}

// ============ Disabled ============

/// Fails every generation call. Selected when `llm.provider = "disabled"`.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(RagError::GenerationFailed(
            "llm provider is disabled".to_string(),
        ))
    }
}

// ============ Echo ============

/// Deterministic local model: answers with the first context line of the
/// prompt, or a fixed refusal when there is none. Lets the full query path
/// run in tests without a network.
pub struct EchoChat;

#[async_trait]
impl ChatModel for EchoChat {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let answer = prompt
            .lines()
            .skip(2)
            .find(|l| {
                let l = l.trim();
                !l.is_empty() && !l.starts_with("Question:") && !l.starts_with("Answer:")
            })
            .map(|l| l.trim().to_string());
        Ok(answer.unwrap_or_else(|| "I don't know.".to_string()))
    }
}

// ============ OpenAI ============

/// Chat model backed by `POST /v1/chat/completions`.
///
/// Same retry discipline as the embeddings client: 429 and 5xx retry with
/// exponential backoff capped at 32s, other 4xx fail immediately.
pub struct OpenAiChat {
    model: String,
    api_key: String,
    url: String,
    temperature: f64,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| RagError::Config("llm api key not configured".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("http client: {e}")))?;

        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_CHAT_URL.to_string()),
            temperature: config.temperature,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "user", "content": prompt}
            ],
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            RagError::GenerationFailed(format!("response body: {e}"))
                        })?;
                        return parse_chat_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(RagError::GenerationFailed(format!(
                            "api error {status}: {body_text}"
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(RagError::GenerationFailed(format!(
                        "api error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err =
                        Some(RagError::from_reqwest(e, "chat completion", self.timeout_secs));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RagError::GenerationFailed("retries exhausted".to_string())))
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| RagError::GenerationFailed("missing message content".to_string()))
}
