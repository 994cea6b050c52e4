use maestro_llm::{GatewayConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

/// Configuration for one agent. Immutable after construction and owned
/// exclusively by one [`crate::AgentRuntime`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Human-readable agent name, used as `agent_id` on emitted events.
    pub name: String,
    /// Model identifier for gateway calls.
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token cap per gateway call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Bearer credential for the remote API.
    pub credential: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retry budget per model on gateway calls.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
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

fn default_max_retries() -> u32 {
    3
}

impl AgentConfig {
    /// Config with defaults for everything but the identifying fields.
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            credential: credential.into(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }

    /// Derive the gateway configuration for this agent.
    pub fn gateway_config(&self) -> GatewayConfig {
        let mut config = GatewayConfig::new(&self.model, &self.credential);
        config.temperature = self.temperature;
        config.max_tokens = self.max_tokens;
        config.timeout_secs = self.timeout_secs;
        config.retry = RetryPolicy {
            max_retries: self.max_retries,
            ..RetryPolicy::default()
        };
        config
    }
}
