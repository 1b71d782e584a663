//! Concrete [`Provider`](crate::provider::Provider) implementations.
//!
//! The registry is built once by the host from [`OrchestratorConfig`] and
//! handed to the orchestrator as an immutable map - providers are injected,
//! never constructed internally.

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{OrchestratorConfig, ProviderId};
use crate::provider::Provider;

/// Builds the full provider registry from deployment configuration.
///
/// Every [`ProviderId`] variant gets an entry so dispatch never hits an
/// unknown-provider hole for enum values; the Gemini entry is the
/// not-supported stub.
#[must_use]
pub fn build_registry(config: &OrchestratorConfig) -> HashMap<ProviderId, Arc<dyn Provider>> {
    let mut registry: HashMap<ProviderId, Arc<dyn Provider>> = HashMap::new();
    registry.insert(
        ProviderId::OpenAi,
        Arc::new(OpenAiProvider::new(&config.openai)),
    );
    registry.insert(
        ProviderId::Anthropic,
        Arc::new(AnthropicProvider::new(&config.anthropic)),
    );
    registry.insert(ProviderId::Gemini, Arc::new(GeminiProvider::new()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_provider_id() {
        let registry = build_registry(&OrchestratorConfig::default());
        for id in [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gemini] {
            let provider = registry.get(&id);
            assert!(provider.is_some(), "missing provider for {id}");
            assert_eq!(provider.map(|p| p.id()), Some(id));
        }
    }
}
