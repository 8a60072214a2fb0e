//! Text generation provider abstraction and implementations.
//!
//! Defines the [`Generator`] trait and concrete implementations:
//! - **[`DisabledGenerator`]** — always fails; used when no provider is configured.
//! - **[`OpenAIGenerator`]** — calls the OpenAI chat completions API.
//! - **[`OllamaGenerator`]** — calls a local Ollama server.
//!
//! # Provider Selection
//!
//! Use [`create_generator`] to instantiate the appropriate generator based
//! on the configuration:
//!
//! ```rust,no_run
//! # use marginalia::config::GenerationConfig;
//! # use marginalia::generation::create_generator;
//! let config = GenerationConfig::default(); // provider = "disabled"
//! let generator = create_generator(&config).unwrap();
//! assert_eq!(generator.model_name(), "disabled");
//! ```
//!
//! # Errors
//!
//! A provider performs exactly one HTTP call per [`Generator::generate`]
//! and classifies the outcome as a [`GenerationError`]. Retrying is the
//! driver's business:
//! - HTTP 429 → [`GenerationError::RateLimited`] (retryable)
//! - HTTP 5xx → [`GenerationError::Api`] (retryable)
//! - HTTP 4xx (not 429) → [`GenerationError::Api`] (fail immediately)
//! - transport timeout / other transport error → retryable
//! - unexpected response JSON → fail immediately

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::GenerationConfig;

/// Errors returned by a single generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Generation provider is disabled")]
    Disabled,
}

impl GenerationError {
    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::RateLimited { .. } => true,
            GenerationError::Api { status, .. } => *status >= 500,
            GenerationError::Network(_) => true,
            GenerationError::Timeout(_) => true,
            GenerationError::InvalidResponse(_) => false,
            GenerationError::Disabled => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout(timeout)
        } else {
            GenerationError::Network(err)
        }
    }
}

/// A text generation backend.
///
/// Implementations perform one call per invocation and never retry.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Generate a completion for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

// ============ Disabled Generator ============

/// A generator that always fails with a non-retryable error.
///
/// Used when `generation.provider = "disabled"`. Every chunk that needs
/// generating ends up as a failure placeholder.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

// ============ OpenAI Generator ============

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Generator using the OpenAI chat completions API.
///
/// Calls `POST {base_url}/chat/completions`. Requires the `OPENAI_API_KEY`
/// environment variable to be set. `base_url` can point at any compatible
/// endpoint.
pub struct OpenAIGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl OpenAIGenerator {
    /// # Errors
    ///
    /// Returns an error if `model` is not set in config, or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            model,
            base_url: trim_base(config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL)),
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::from_transport(e, self.timeout))?;

        let json = read_json(response, self.timeout).await?;
        parse_openai_response(&json)
    }
}

/// Extract `choices[0].message.content`.
fn parse_openai_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            GenerationError::InvalidResponse("missing choices[0].message.content".to_string())
        })
}

// ============ Ollama Generator ============

const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Generator using a local Ollama server (`POST {base_url}/api/generate`).
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            model,
            base_url: trim_base(config.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL)),
            timeout,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::from_transport(e, self.timeout))?;

        let json = read_json(response, self.timeout).await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| GenerationError::InvalidResponse("missing response field".to_string()))
    }
}

/// Classify the HTTP status and decode a successful body.
async fn read_json(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<serde_json::Value, GenerationError> {
    let status = response.status();

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(GenerationError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(GenerationError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let text = response
        .text()
        .await
        .map_err(|e| GenerationError::from_transport(e, timeout))?;
    serde_json::from_str(&text).map_err(|e| GenerationError::InvalidResponse(e.to_string()))
}

fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Create the appropriate [`Generator`] based on configuration.
///
/// | Config Value | Generator |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledGenerator`] |
/// | `"openai"` | [`OpenAIGenerator`] |
/// | `"ollama"` | [`OllamaGenerator`] |
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
