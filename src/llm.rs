//! Language model provider abstraction and implementations.
//!
//! - **[`DisabledModel`]**: returns errors; used when no model is configured.
//! - **[`OpenAIChatModel`]**: `POST /v1/chat/completions` (default `gpt-4o-mini`).
//! - **[`OllamaModel`]**: `POST /api/generate` on a local Ollama instance.
//!
//! Both network providers share the retry policy in [`crate::http`] and
//! bound every request by `llm.timeout_secs`.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{DocQaError, Result};
use crate::http::{client_with_timeout, post_json_with_retry};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// A text-completion service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Complete `prompt`. `temperature = 0.0` asks the service to minimize
    /// sampling randomness; identical output across calls is not guaranteed.
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String>;
}

/// A model that refuses every call.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _prompt: &str, _temperature: f32) -> Result<String> {
        Err(DocQaError::LanguageModel(
            "language model is disabled; set [llm].provider in the config".to_string(),
        ))
    }
}

/// OpenAI chat completions. Requires `OPENAI_API_KEY`.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    max_retries: u32,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            DocQaError::Config("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        let client = client_with_timeout(config.timeout_secs).map_err(DocQaError::Config)?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/chat/completions", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await
        .map_err(DocQaError::LanguageModel)?;

        parse_openai_chat_response(&json)
    }
}

fn parse_openai_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            DocQaError::LanguageModel(
                "invalid OpenAI response: missing choices[0].message.content".to_string(),
            )
        })
}

/// Ollama `/api/generate`, non-streaming.
pub struct OllamaModel {
    client: reqwest::Client,
    model: String,
    url: String,
    max_retries: u32,
}

impl OllamaModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = client_with_timeout(config.timeout_secs).map_err(DocQaError::Config)?;
        Ok(Self {
            client,
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": temperature },
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/generate", self.url.trim_end_matches('/')),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(DocQaError::LanguageModel)?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                DocQaError::LanguageModel("invalid Ollama response: missing response".to_string())
            })
    }
}

/// Create the [`LanguageModel`] named by `llm.provider`.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaModel::new(config)?)),
        other => Err(DocQaError::Config(format!("Unknown llm provider: {}", other))),
    }
}
