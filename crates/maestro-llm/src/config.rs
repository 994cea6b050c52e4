use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configures retry behaviour for one gateway instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries per model before advancing to the next
    /// fallback model (so at most `max_retries + 1` attempts per model).
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
    /// Upper bound of the uniform jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Policy with zero delays, for tests that should not sleep.
    pub fn instant(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Backoff delay for a given attempt: exponential, capped, plus
    /// uniform jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(self.backoff_max_ms);
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        Duration::from_millis(base.saturating_add(jitter))
    }
}

/// Configuration for an [`crate::LlmGateway`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Primary model identifier.
    pub model: String,
    /// Bearer credential for the remote API.
    pub credential: String,
    /// Override for the API base URL.
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token cap per request.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout in seconds; expiry surfaces as a retryable
    /// network error.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Models tried, in order, after the primary's retry budget is
    /// exhausted.
    #[serde(default)]
    pub fallback_models: Vec<String>,
    /// Retry/backoff policy.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Minimum delay between any two outbound requests from this
    /// gateway instance, regardless of retry state.
    #[serde(default = "default_min_interval_ms")]
    pub min_request_interval_ms: u64,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_min_interval_ms() -> u64 {
    50
}

impl GatewayConfig {
    /// Config with defaults for everything but model and credential.
    pub fn new(model: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            credential: credential.into(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            fallback_models: Vec::new(),
            retry: RetryPolicy::default(),
            min_request_interval_ms: default_min_interval_ms(),
        }
    }

    /// The effective API base URL.
    pub fn base_url(&self) -> &str {
        self.api_base_url
            .as_deref()
            .unwrap_or("https://api.openai.com")
    }

    /// Primary model followed by the fallbacks, in try order.
    pub fn model_chain(&self) -> Vec<String> {
        let mut chain = Vec::with_capacity(1 + self.fallback_models.len());
        chain.push(self.model.clone());
        chain.extend(self.fallback_models.iter().cloned());
        chain
    }
}
