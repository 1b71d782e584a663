//! `OpenAI` provider implementation using the `async-openai` crate.
//!
//! Supports any `OpenAI`-compatible API (`OpenAI`, Azure, local proxies)
//! via the base URL override in [`ProviderCredentials`].

use std::time::Instant;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, CreateChatCompletionRequest,
};
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::{AgentConfig, ProviderCredentials, ProviderId};
use crate::provider::{ModelRate, Provider, ProviderRequest, ProviderResult, cost_from_table};
use crate::record::TokenUsage;

/// Models this provider accepts, first entry doubles as the pricing fallback.
const MODELS: &[&str] = &["gpt-4o-mini", "gpt-4o", "gpt-4.1", "gpt-4.1-mini"];

/// Pricing fallback for models missing from the rate table.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Currency units per 1K tokens.
const RATES: &[ModelRate] = &[
    ModelRate {
        model: "gpt-4o-mini",
        input_per_1k: Decimal::from_parts(15, 0, 0, false, 5), // 0.00015
        output_per_1k: Decimal::from_parts(6, 0, 0, false, 4), // 0.0006
    },
    ModelRate {
        model: "gpt-4o",
        input_per_1k: Decimal::from_parts(25, 0, 0, false, 4), // 0.0025
        output_per_1k: Decimal::from_parts(1, 0, 0, false, 2), // 0.01
    },
    ModelRate {
        model: "gpt-4.1",
        input_per_1k: Decimal::from_parts(2, 0, 0, false, 3), // 0.002
        output_per_1k: Decimal::from_parts(8, 0, 0, false, 3), // 0.008
    },
    ModelRate {
        model: "gpt-4.1-mini",
        input_per_1k: Decimal::from_parts(4, 0, 0, false, 4),  // 0.0004
        output_per_1k: Decimal::from_parts(16, 0, 0, false, 4), // 0.0016
    },
];

/// `OpenAI`-compatible LLM provider.
///
/// Wraps the `async-openai` client for chat completions. Compatible with
/// any API that follows the `OpenAI` chat completion spec.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    /// Creates a new provider from deployment credentials.
    #[must_use]
    pub fn new(credentials: &ProviderCredentials) -> Self {
        let mut openai_config = OpenAIConfig::new();

        if let Some(ref api_key) = credentials.api_key {
            openai_config = openai_config.with_api_key(api_key);
        }
        if let Some(ref base_url) = credentials.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Self {
            client: Client::with_config(openai_config),
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(request: &ProviderRequest) -> CreateChatCompletionRequest {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(2);

        if !request.system_prompt.is_empty() {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: async_openai::types::ChatCompletionRequestSystemMessageContent::Text(
                        request.system_prompt.clone(),
                    ),
                    name: None,
                },
            ));
        }

        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content: async_openai::types::ChatCompletionRequestUserMessageContent::Text(
                    request.user_content.clone(),
                ),
                name: None,
            },
        ));

        CreateChatCompletionRequest {
            model: request.model.clone(),
            messages,
            temperature: Some(request.temperature).filter(|&t| t != 0.0),
            max_completion_tokens: Some(request.max_output_tokens),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn execute(&self, _config: &AgentConfig, request: &ProviderRequest) -> ProviderResult {
        let openai_request = Self::build_request(request);
        let start = Instant::now();

        let response = match self.client.chat().create(openai_request).await {
            Ok(response) => response,
            Err(e) => return ProviderResult::failure(e.to_string(), start.elapsed()),
        };

        let duration = start.elapsed();
        let choice = response.choices.first();

        let output = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let finish_reason = choice
            .and_then(|c| {
                c.finish_reason
                    .as_ref()
                    .map(|fr| format!("{fr:?}").to_lowercase())
            })
            .unwrap_or_else(|| "stop".to_string());

        let usage = response.usage.map_or_else(TokenUsage::default, |u| {
            TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }
        });

        ProviderResult::success(output, usage, duration, finish_reason)
    }

    fn models(&self) -> &[&str] {
        MODELS
    }

    fn calculate_cost(&self, total_tokens: u32, model: &str) -> Decimal {
        cost_from_table(RATES, total_tokens, model, DEFAULT_MODEL)
    }
}
