//! Text generation providers.
//!
//! A [`Generator`] turns a prompt into free text. There is no structured
//! output guarantee: callers that need structure (function calls) parse it
//! out of the text themselves, see [`crate::functions`].
//!
//! Generation is never retried internally. Every call is bounded by
//! `generation.timeout_secs`; expiry surfaces as
//! [`QaError::GenerationTimeout`] so the client can decide to retry.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{QaError, Result};

/// A generative language model.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| QaError::GenerationFailure(e.to_string()))
}

fn classify(err: reqwest::Error, timeout_secs: u64, label: &str) -> QaError {
    if err.is_timeout() {
        QaError::GenerationTimeout(timeout_secs)
    } else {
        QaError::GenerationFailure(format!("{} request failed: {}", label, err))
    }
}

// ============ Ollama ============

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Generator backed by Ollama's `POST /api/generate` (non-streaming).
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    timeout_secs: u64,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout_secs, "Ollama"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(QaError::GenerationFailure(format!(
                "Ollama API error {}: {}",
                status, text
            )));
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| classify(e, self.timeout_secs, "Ollama"))?;
        Ok(parsed.response)
    }
}

// ============ OpenAI ============

/// Generator backed by the OpenAI chat completions API.
///
/// The whole prompt is sent as a single user message. Requires
/// `OPENAI_API_KEY` in the environment.
pub struct OpenAIGenerator {
    client: reqwest::Client,
    model: String,
    api_key: String,
    timeout_secs: u64,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            QaError::InvalidConfiguration("OPENAI_API_KEY environment variable not set".into())
        })?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(e, self.timeout_secs, "OpenAI"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(QaError::GenerationFailure(format!(
                "OpenAI API error {}: {}",
                status, text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify(e, self.timeout_secs, "OpenAI"))?;
        parse_openai_chat(&json)
    }
}

fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            QaError::GenerationFailure("Invalid OpenAI response: missing message content".into())
        })
}

/// Create the [`Generator`] selected by configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Box::new(OpenAIGenerator::new(config)?)),
        other => Err(QaError::InvalidConfiguration(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}
