//! Agent and orchestrator configuration.
//!
//! [`AgentConfig`] is the immutable per-agent settings bundle resolved at
//! admission time; per-call [`ExecutionOverrides`] are merged onto a value
//! copy so an in-flight execution never observes a concurrent update.
//! [`OrchestratorConfig`] carries the deployment-level surface (provider
//! credentials, default limits) and is resolved in order: explicit values
//! → environment variables → defaults.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Default per-agent requests per minute.
const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
/// Default per-agent tokens per minute.
const DEFAULT_TOKENS_PER_MINUTE: u32 = 100_000;
/// Default sliding-window length in seconds.
const DEFAULT_WINDOW_SECS: u64 = 60;
/// Default provider call timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Upper bound on configurable output tokens.
const MAX_OUTPUT_TOKENS: u32 = 128_000;

/// Identifier for a registered LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// `OpenAI`-compatible chat completion APIs.
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini (registered but not yet supported).
    Gemini,
}

impl ProviderId {
    /// Canonical lowercase name used in logs and config files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-agent admission thresholds for the sliding-window rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum admitted requests within the trailing window. Zero means
    /// inherit the deployment default from
    /// [`OrchestratorConfig::default_requests_per_minute`].
    pub requests_per_minute: u32,
    /// Token budget per window. Carried for billing parity; admission is
    /// enforced on request count only.
    pub tokens_per_minute: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            tokens_per_minute: DEFAULT_TOKENS_PER_MINUTE,
        }
    }
}

/// Immutable per-agent settings.
///
/// Created when an agent is registered and mutated only through an explicit
/// repository update. The orchestrator reads a value copy per execution, so
/// updates never race an in-flight call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent identifier.
    pub agent_id: String,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Which provider executes this agent.
    pub provider: ProviderId,
    /// Sampling temperature (0.0-1.0).
    pub temperature: f32,
    /// Maximum output tokens (1-128000).
    pub max_output_tokens: u32,
    /// System prompt prepended to every task.
    pub system_prompt: String,
    /// Capability tags consumed by external routing/reporting.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Admission thresholds for this agent.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Disabled agents fail admission with an `Inactive` error.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

const fn default_active() -> bool {
    true
}

impl AgentConfig {
    /// Creates a config with defaults for everything but the identity fields.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        model: impl Into<String>,
        provider: ProviderId,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            model: model.into(),
            provider,
            temperature: 0.0,
            max_output_tokens: 4096,
            system_prompt: String::new(),
            capabilities: BTreeSet::new(),
            rate_limit: RateLimitSettings::default(),
            is_active: true,
        }
    }

    /// Validates field ranges.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Validation`] when temperature or token
    /// bounds are out of range, or identity fields are empty.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.agent_id.trim().is_empty() {
            return Err(DispatchError::Validation {
                message: "agent_id cannot be empty".to_string(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(DispatchError::Validation {
                message: "model cannot be empty".to_string(),
            });
        }
        validate_temperature(self.temperature)?;
        validate_max_tokens(self.max_output_tokens)?;
        Ok(())
    }

    /// Returns a copy of this config with per-call overrides applied.
    ///
    /// Each override field wins when present; unset fields leave the base
    /// value untouched, so merging an empty override is the identity.
    #[must_use]
    pub fn merged(&self, overrides: &ExecutionOverrides) -> Self {
        let mut merged = self.clone();
        if let Some(t) = overrides.temperature {
            merged.temperature = t;
        }
        if let Some(m) = overrides.max_output_tokens {
            merged.max_output_tokens = m;
        }
        if let Some(ref p) = overrides.system_prompt {
            merged.system_prompt.clone_from(p);
        }
        merged
    }
}

/// Optional per-call overrides carried on an execution request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOverrides {
    /// Override sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Override maximum output tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Override the system prompt for this call only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Request streamed output. Carried through to the provider request;
    /// current providers execute non-streaming regardless.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

impl ExecutionOverrides {
    /// Validates override value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Validation`] for out-of-range values.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if let Some(t) = self.temperature {
            validate_temperature(t)?;
        }
        if let Some(m) = self.max_output_tokens {
            validate_max_tokens(m)?;
        }
        Ok(())
    }
}

fn validate_temperature(t: f32) -> Result<(), DispatchError> {
    if !(0.0..=1.0).contains(&t) || t.is_nan() {
        return Err(DispatchError::Validation {
            message: format!("temperature must be within 0.0-1.0, got {t}"),
        });
    }
    Ok(())
}

fn validate_max_tokens(m: u32) -> Result<(), DispatchError> {
    if m == 0 || m > MAX_OUTPUT_TOKENS {
        return Err(DispatchError::Validation {
            message: format!("max_output_tokens must be within 1-{MAX_OUTPUT_TOKENS}, got {m}"),
        });
    }
    Ok(())
}

/// Per-provider credentials.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Optional base URL override (proxies or compatible APIs).
    pub base_url: Option<String>,
}

/// Deployment-level configuration consumed by the orchestrator wiring.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// `OpenAI` credentials.
    pub openai: ProviderCredentials,
    /// Anthropic credentials.
    pub anthropic: ProviderCredentials,
    /// Default requests-per-window for agents without an explicit limit.
    pub default_requests_per_minute: u32,
    /// Sliding-window length.
    pub rate_window: Duration,
    /// Provider call deadline.
    pub timeout: Duration,
}

impl OrchestratorConfig {
    /// Creates a new builder for `OrchestratorConfig`.
    #[must_use]
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::builder().from_env().build()
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    openai_api_key: Option<String>,
    openai_base_url: Option<String>,
    anthropic_api_key: Option<String>,
    anthropic_base_url: Option<String>,
    default_requests_per_minute: Option<u32>,
    rate_window: Option<Duration>,
    timeout: Option<Duration>,
}

impl OrchestratorConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        if self.openai_api_key.is_none() {
            self.openai_api_key = std::env::var("DISPATCH_OPENAI_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
        }
        if self.openai_base_url.is_none() {
            self.openai_base_url = std::env::var("DISPATCH_OPENAI_BASE_URL")
                .or_else(|_| std::env::var("OPENAI_BASE_URL"))
                .ok();
        }
        if self.anthropic_api_key.is_none() {
            self.anthropic_api_key = std::env::var("DISPATCH_ANTHROPIC_API_KEY")
                .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
                .ok();
        }
        if self.anthropic_base_url.is_none() {
            self.anthropic_base_url = std::env::var("DISPATCH_ANTHROPIC_BASE_URL").ok();
        }
        if self.default_requests_per_minute.is_none() {
            self.default_requests_per_minute = std::env::var("DISPATCH_RATE_LIMIT_RPM")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.rate_window.is_none() {
            self.rate_window = std::env::var("DISPATCH_RATE_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
        }
        if self.timeout.is_none() {
            self.timeout = std::env::var("DISPATCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
        }
        self
    }

    /// Sets the `OpenAI` API key.
    #[must_use]
    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    /// Sets the `OpenAI` base URL override.
    #[must_use]
    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.openai_base_url = Some(url.into());
        self
    }

    /// Sets the Anthropic API key.
    #[must_use]
    pub fn anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }

    /// Sets the Anthropic base URL override.
    #[must_use]
    pub fn anthropic_base_url(mut self, url: impl Into<String>) -> Self {
        self.anthropic_base_url = Some(url.into());
        self
    }

    /// Sets the default requests-per-window threshold.
    #[must_use]
    pub const fn default_requests_per_minute(mut self, n: u32) -> Self {
        self.default_requests_per_minute = Some(n);
        self
    }

    /// Sets the sliding-window length.
    #[must_use]
    pub const fn rate_window(mut self, window: Duration) -> Self {
        self.rate_window = Some(window);
        self
    }

    /// Sets the provider call deadline.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Builds the [`OrchestratorConfig`].
    #[must_use]
    pub fn build(self) -> OrchestratorConfig {
        OrchestratorConfig {
            openai: ProviderCredentials {
                api_key: self.openai_api_key,
                base_url: self.openai_base_url,
            },
            anthropic: ProviderCredentials {
                api_key: self.anthropic_api_key,
                base_url: self.anthropic_base_url,
            },
            default_requests_per_minute: self
                .default_requests_per_minute
                .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE),
            rate_window: self
                .rate_window
                .unwrap_or(Duration::from_secs(DEFAULT_WINDOW_SECS)),
            timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }
}
