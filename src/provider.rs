//! Pluggable LLM provider trait.
//!
//! Implementations translate a provider-agnostic [`ProviderRequest`] into
//! vendor SDK calls. All vendor failures (network, auth, quota) are
//! normalized into the returned [`ProviderResult`]'s error field - nothing
//! is thrown past this boundary, so the orchestrator's dispatch logic is
//! uniform across vendors.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::{AgentConfig, ProviderId};
use crate::record::TokenUsage;

/// Finish reason recorded on normalized provider failures.
pub const FINISH_REASON_ERROR: &str = "error";

/// Provider-agnostic request for one model invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRequest {
    /// Model identifier.
    pub model: String,
    /// System prompt (may be empty).
    pub system_prompt: String,
    /// Rendered user content: task text plus structured input.
    pub user_content: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum output tokens.
    pub max_output_tokens: u32,
    /// Streaming requested by the caller. Providers currently execute
    /// non-streaming and ignore this flag.
    pub stream: bool,
}

/// Result of one model invocation.
///
/// Either `output` is populated (success) or `error` is (failure). Failure
/// results carry a zeroed usage block and `finish_reason = "error"`.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderResult {
    /// Generated text (empty on failure).
    pub output: String,
    /// Token usage (zeroed on failure).
    pub usage: TokenUsage,
    /// Wall-clock duration of the vendor call.
    pub duration: Duration,
    /// Why the model stopped generating (e.g. `"stop"`, `"length"`,
    /// `"error"`).
    pub finish_reason: String,
    /// Normalized vendor error message, when the call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderResult {
    /// Builds a success result.
    #[must_use]
    pub fn success(
        output: String,
        usage: TokenUsage,
        duration: Duration,
        finish_reason: String,
    ) -> Self {
        Self {
            output,
            usage,
            duration,
            finish_reason,
            error: None,
        }
    }

    /// Builds a normalized failure result with zeroed usage.
    #[must_use]
    pub fn failure(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            output: String::new(),
            usage: TokenUsage::default(),
            duration,
            finish_reason: FINISH_REASON_ERROR.to_string(),
            error: Some(message.into()),
        }
    }

    /// True when the invocation failed.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Trait implemented by every LLM vendor backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Which provider id this implementation serves.
    fn id(&self) -> ProviderId;

    /// Performs one model invocation.
    ///
    /// Never returns an error past this boundary: vendor failures are
    /// normalized into [`ProviderResult::failure`].
    async fn execute(&self, config: &AgentConfig, request: &ProviderRequest) -> ProviderResult;

    /// True iff the config's model identifier is in this provider's
    /// known-model list.
    fn validate_config(&self, config: &AgentConfig) -> bool {
        self.models().contains(&config.model.as_str())
    }

    /// Model identifiers this provider supports.
    fn models(&self) -> &[&str];

    /// Computes the cost of `total_tokens` for `model` in currency units.
    ///
    /// Pure function: identical inputs always yield identical output.
    fn calculate_cost(&self, total_tokens: u32, model: &str) -> Decimal;
}

/// Per-model pricing in currency units per 1K tokens.
#[derive(Debug, Clone, Copy)]
pub struct ModelRate {
    /// Model identifier.
    pub model: &'static str,
    /// Input (prompt) rate per 1K tokens.
    pub input_per_1k: Decimal,
    /// Output (completion) rate per 1K tokens.
    pub output_per_1k: Decimal,
}

/// Tokens per pricing unit.
const TOKENS_PER_UNIT: Decimal = Decimal::from_parts(1000, 0, 0, false, 0);

/// Computes cost from a rate table, falling back to `default_model` for
/// unknown models.
///
/// Applies the output rate to the total token count. The source system
/// billed this way, and changing it would silently alter observable
/// billing numbers, so the behavior is preserved.
#[must_use]
pub fn cost_from_table(
    rates: &[ModelRate],
    total_tokens: u32,
    model: &str,
    default_model: &str,
) -> Decimal {
    let rate = rates
        .iter()
        .find(|r| r.model == model)
        .or_else(|| rates.iter().find(|r| r.model == default_model))
        .map_or(Decimal::ZERO, |r| r.output_per_1k);

    Decimal::from(total_tokens) / TOKENS_PER_UNIT * rate
}
