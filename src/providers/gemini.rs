//! Gemini provider stub.
//!
//! Registered so dispatch stays uniform across the provider enum, but not
//! yet implemented: `execute` always returns a fixed failure and no model
//! passes config validation. Keeping the stub in the registry means an
//! agent misconfigured onto Gemini fails as an execution failure with a
//! clear message instead of an unknown-provider admission error.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::{AgentConfig, ProviderId};
use crate::provider::{Provider, ProviderRequest, ProviderResult};

/// Error message returned by every `execute` call.
pub const NOT_SUPPORTED: &str = "gemini provider is not supported yet";

/// Placeholder Gemini provider that satisfies the full [`Provider`] trait.
#[derive(Debug, Default)]
pub struct GeminiProvider;

impl GeminiProvider {
    /// Creates the stub provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    async fn execute(&self, _config: &AgentConfig, _request: &ProviderRequest) -> ProviderResult {
        ProviderResult::failure(NOT_SUPPORTED, Duration::ZERO)
    }

    fn validate_config(&self, _config: &AgentConfig) -> bool {
        false
    }

    fn models(&self) -> &[&str] {
        &[]
    }

    fn calculate_cost(&self, _total_tokens: u32, _model: &str) -> Decimal {
        Decimal::ZERO
    }
}
