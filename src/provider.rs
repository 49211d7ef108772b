//! AI provider abstraction and implementations.
//!
//! Defines the [`Provider`] trait, the pipeline's only view of the external
//! text-classification service, and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when no provider is configured.
//! - **[`GeminiProvider`]**: calls the Gemini `generateContent` REST API.
//!
//! Providers perform a single attempt. Retry, rate limiting and circuit
//! breaking live in [`crate::reliability`], which wraps every call.
//!
//! # Error mapping
//!
//! | Condition | [`ClassifyError`] |
//! |-----------|-------------------|
//! | HTTP 429 | `RateLimited` |
//! | HTTP 5xx, network error | `Transient` |
//! | client timeout | `Timeout` |
//! | other HTTP 4xx | `InvalidRequest` |
//! | `promptFeedback.blockReason` | `ContentBlocked` |

use async_trait::async_trait;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{ClassifyError, Result};
use crate::models::TokenUsage;

/// One classification request. Decoding is deterministic: temperature 0
/// and a fixed seed.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub seed: i64,
    pub max_output_tokens: u32,
}

impl GenerateRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: 0.0,
            seed: 42,
            max_output_tokens: 65_536,
        }
    }

    pub fn with_limits(mut self, config: &ProviderConfig) -> Self {
        self.seed = config.seed;
        self.max_output_tokens = config.max_output_tokens;
        self
    }
}

/// Why the provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Other,
}

impl FinishReason {
    fn parse(s: &str) -> Self {
        match s {
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::MaxTokens,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
                FinishReason::Safety
            }
            _ => FinishReason::Other,
        }
    }
}

/// Raw provider output.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
    pub finish: FinishReason,
}

impl Generation {
    /// Turn terminal finish reasons into errors.
    pub fn check_finish(self) -> Result<Generation> {
        match self.finish {
            FinishReason::MaxTokens => Err(ClassifyError::Truncated {
                candidates_tokens: self.usage.candidates_tokens,
            }),
            FinishReason::Safety => Err(ClassifyError::ContentBlocked(
                "response stopped by safety filter".to_string(),
            )),
            FinishReason::Stop | FinishReason::Other => Ok(self),
        }
    }
}

/// The external AI text-classification service.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-2.0-flash"`).
    fn model_name(&self) -> &str;

    /// Perform exactly one generation attempt.
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation>;
}

// ============ Disabled Provider ============

/// A no-op provider that always returns errors.
///
/// Used when `provider.kind = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl Provider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerateRequest) -> Result<Generation> {
        Err(ClassifyError::InvalidRequest(
            "AI provider is disabled".to_string(),
        ))
    }
}

// ============ Gemini Provider ============

/// Provider using the Gemini `generateContent` API.
///
/// Requests a JSON response (`responseMimeType = application/json`). The
/// API key is read from the environment variable named by
/// `provider.api_key_env`.
pub struct GeminiProvider {
    model: String,
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a new Gemini provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the API key variable is not set or the HTTP
    /// client cannot be built.
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
            client,
        })
    }

    fn request_body(request: &GenerateRequest) -> serde_json::Value {
        serde_json::json!({
            "systemInstruction": { "parts": [{ "text": request.system_prompt }] },
            "contents": [{ "role": "user", "parts": [{ "text": request.user_prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "seed": request.seed,
                "maxOutputTokens": request.max_output_tokens,
                "responseMimeType": "application/json",
            },
        })
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<Generation> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        if status.is_success() {
            let json: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| ClassifyError::MalformedResponse(e.to_string()))?;
            return parse_gemini_response(&json, &self.model);
        }

        let body_text = resp.text().await.unwrap_or_default();
        let detail = format!("Gemini API error {}: {}", status, body_text);

        // Rate limited or server error: retryable
        if status.as_u16() == 429 {
            return Err(ClassifyError::RateLimited(detail));
        }
        if status.is_server_error() {
            return Err(ClassifyError::Transient(detail));
        }

        // Client error (not 429): don't retry
        Err(ClassifyError::InvalidRequest(detail))
    }
}

impl GeminiProvider {
    fn map_transport_error(&self, e: reqwest::Error) -> ClassifyError {
        if e.is_timeout() {
            ClassifyError::Timeout(self.timeout)
        } else {
            ClassifyError::Transient(e.to_string())
        }
    }
}

/// Parse a `generateContent` response body.
///
/// Concatenates the text parts of the first candidate and extracts usage
/// metadata. A prompt-level block is reported as `ContentBlocked`.
fn parse_gemini_response(json: &serde_json::Value, model: &str) -> Result<Generation> {
    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(|r| r.as_str())
    {
        return Err(ClassifyError::ContentBlocked(reason.to_string()));
    }

    let candidate = json
        .pointer("/candidates/0")
        .ok_or_else(|| ClassifyError::MalformedResponse("missing candidates".to_string()))?;

    let finish = candidate
        .get("finishReason")
        .and_then(|r| r.as_str())
        .map(FinishReason::parse)
        .unwrap_or(FinishReason::Other);

    let text: String = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    let count = |field: &str| {
        json.pointer(&format!("/usageMetadata/{}", field))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    Ok(Generation {
        text,
        usage: TokenUsage {
            prompt_tokens: count("promptTokenCount"),
            candidates_tokens: count("candidatesTokenCount"),
            total_tokens: count("totalTokenCount"),
            model: model.to_string(),
        },
        finish,
    })
}

/// Create the appropriate [`Provider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"gemini"` | [`GeminiProvider`] |
pub fn create_provider(config: &ProviderConfig) -> anyhow::Result<Box<dyn Provider>> {
    match config.kind.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "gemini" => Ok(Box::new(GeminiProvider::new(config)?)),
        other => anyhow::bail!("Unknown provider: {}", other),
    }
}
