//! Answer generators backed by hosted LLM APIs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use thiserror::Error;

use crate::config::{AiConfig, ProviderKind};

use super::GENERATOR_SYSTEM_PROMPT;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Retries after the first attempt for 5xx responses.
const MAX_RETRIES: u32 = 3;

fn build_http_client() -> Result<Client, GenerationError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| GenerationError::Client(e.to_string()))
}

/// Only server-side failures are retried, and only `MAX_RETRIES` times.
fn is_retryable(status: u16, attempt: u32) -> bool {
    attempt < MAX_RETRIES && (500..=599).contains(&status)
}

/// Doubling delay starting at one second.
fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(6))
}

/// Errors from answer generation.
#[derive(Error, Debug)]
pub enum GenerationError {
    /// The environment variable holding the API key is unset.
    #[error("generator API key missing: set {0}")]
    MissingApiKey(String),
    #[error("could not build HTTP client: {0}")]
    Client(String),
    #[error("generator request failed: {0}")]
    RequestFailed(String),
    #[error("unexpected generator response: {0}")]
    ParseError(String),
    #[error("generator request timed out")]
    Timeout,
}

/// Produces an answer from a fully assembled prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Send a JSON request, retrying 5xx responses with backoff, and return the
/// parsed body of the first success.
async fn send_with_retry<F>(build: F) -> Result<serde_json::Value, GenerationError>
where
    F: Fn() -> RequestBuilder + Send + Sync,
{
    let mut attempt = 0;
    loop {
        let response = build().send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout
            } else {
                GenerationError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| GenerationError::ParseError(e.to_string()));
        }

        if is_retryable(status.as_u16(), attempt) {
            let delay = retry_delay(attempt);
            tracing::debug!(%status, attempt, ?delay, "Generator returned a server error, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::RequestFailed(format!("HTTP {status}: {body}")));
    }
}

/// Generator backed by the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl GeminiProvider {
    /// # Errors
    ///
    /// Returns `GenerationError::Client` if the HTTP client cannot be built.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        max_tokens: u32,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            client: build_http_client()?,
            base_url,
            api_key,
            model,
            max_tokens,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "systemInstruction": {
                "parts": [{ "text": GENERATOR_SYSTEM_PROMPT }]
            },
            "generationConfig": {
                "maxOutputTokens": self.max_tokens
            }
        })
    }
}

#[async_trait]
impl Generator for GeminiProvider {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/models/{}:generateContent", self.model);
        let body = self.request_body(prompt);

        let json = send_with_retry(|| {
            self.client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
        })
        .await?;

        json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| GenerationError::ParseError("No text in Gemini response".to_string()))
    }
}

/// Generator backed by the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct ClaudeProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeProvider {
    /// # Errors
    ///
    /// Returns `GenerationError::Client` if the HTTP client cannot be built.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        max_tokens: u32,
    ) -> Result<Self, GenerationError> {
        Ok(Self {
            client: build_http_client()?,
            base_url,
            api_key,
            model,
            max_tokens,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": GENERATOR_SYSTEM_PROMPT,
            "messages": [{
                "role": "user",
                "content": prompt
            }]
        })
    }
}

#[async_trait]
impl Generator for ClaudeProvider {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = self.request_body(prompt);

        let json = send_with_retry(|| {
            self.client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
        })
        .await?;

        json["content"][0]["text"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| GenerationError::ParseError("No text in Claude response".to_string()))
    }
}

/// The configured generator backend.
#[derive(Debug, Clone)]
pub enum Provider {
    Gemini(GeminiProvider),
    Claude(ClaudeProvider),
}

impl Provider {
    /// Build the configured provider, reading its API key from the environment.
    ///
    /// # Errors
    ///
    /// Returns `GenerationError::MissingApiKey` if the configured API key
    /// environment variable is not set.
    pub fn from_config(config: &AiConfig) -> Result<Self, GenerationError> {
        let Ok(api_key) = std::env::var(&config.api_key_env) else {
            return Err(GenerationError::MissingApiKey(config.api_key_env.clone()));
        };

        Ok(match config.provider {
            ProviderKind::Gemini => Self::Gemini(GeminiProvider::new(
                config.base_url.clone(),
                api_key,
                config.model.clone(),
                config.max_tokens,
            )?),
            ProviderKind::Claude => Self::Claude(ClaudeProvider::new(
                config.base_url.clone(),
                api_key,
                config.model.clone(),
                config.max_tokens,
            )?),
        })
    }

    /// Model name requests are sent to.
    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            Self::Gemini(p) => &p.model,
            Self::Claude(p) => &p.model,
        }
    }
}

#[async_trait]
impl Generator for Provider {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        match self {
            Self::Gemini(p) => p.generate(prompt).await,
            Self::Claude(p) => p.generate(prompt).await,
        }
    }
}
