//! Anthropic provider implementation over the Messages API.
//!
//! Talks directly to `POST /v1/messages` with `reqwest`; no vendor SDK. The
//! wire types live here as private serde structs since nothing else in
//! the crate needs them.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{AgentConfig, ProviderCredentials, ProviderId};
use crate::provider::{ModelRate, Provider, ProviderRequest, ProviderResult, cost_from_table};
use crate::record::TokenUsage;

/// Default API endpoint.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Messages API version header value.
const API_VERSION: &str = "2023-06-01";

/// Models this provider accepts.
const MODELS: &[&str] = &[
    "claude-3-5-haiku-20241022",
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
];

/// Pricing fallback for models missing from the rate table.
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";

/// Currency units per 1K tokens.
const RATES: &[ModelRate] = &[
    ModelRate {
        model: "claude-3-5-haiku-20241022",
        input_per_1k: Decimal::from_parts(8, 0, 0, false, 4), // 0.0008
        output_per_1k: Decimal::from_parts(4, 0, 0, false, 3), // 0.004
    },
    ModelRate {
        model: "claude-sonnet-4-20250514",
        input_per_1k: Decimal::from_parts(3, 0, 0, false, 3),  // 0.003
        output_per_1k: Decimal::from_parts(15, 0, 0, false, 3), // 0.015
    },
    ModelRate {
        model: "claude-opus-4-20250514",
        input_per_1k: Decimal::from_parts(15, 0, 0, false, 3), // 0.015
        output_per_1k: Decimal::from_parts(75, 0, 0, false, 3), // 0.075
    },
];

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

/// Anthropic Messages API provider.
#[derive(Debug)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Creates a new provider from deployment credentials.
    #[must_use]
    pub fn new(credentials: &ProviderCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: credentials.api_key.clone().unwrap_or_default(),
            base_url: credentials
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    /// Maps Anthropic stop reasons onto the crate's finish-reason vocabulary.
    fn normalize_stop_reason(stop_reason: Option<&str>) -> String {
        match stop_reason {
            Some("end_turn") | None => "stop".to_string(),
            Some("max_tokens") => "length".to_string(),
            Some(other) => other.to_string(),
        }
    }

    async fn call(&self, request: &ProviderRequest) -> Result<MessagesResponse, String> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_output_tokens,
            system: (!request.system_prompt.is_empty()).then_some(request.system_prompt.as_str()),
            temperature: request.temperature,
            messages: vec![WireMessage {
                role: "user",
                content: &request.user_content,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            // Prefer the structured API error body when it parses.
            let detail = response
                .json::<ErrorEnvelope>()
                .await
                .map_or_else(
                    |_| format!("HTTP {status}"),
                    |env| format!("{}: {}", env.error.kind, env.error.message),
                );
            return Err(detail);
        }

        response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| format!("malformed response: {e}"))
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    async fn execute(&self, _config: &AgentConfig, request: &ProviderRequest) -> ProviderResult {
        let start = Instant::now();

        let response = match self.call(request).await {
            Ok(response) => response,
            Err(message) => return ProviderResult::failure(message, start.elapsed()),
        };

        let duration: Duration = start.elapsed();

        let output: String = response
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();

        let usage = TokenUsage::new(response.usage.input_tokens, response.usage.output_tokens);
        let finish_reason = Self::normalize_stop_reason(response.stop_reason.as_deref());

        ProviderResult::success(output, usage, duration, finish_reason)
    }

    fn models(&self) -> &[&str] {
        MODELS
    }

    fn calculate_cost(&self, total_tokens: u32, model: &str) -> Decimal {
        cost_from_table(RATES, total_tokens, model, DEFAULT_MODEL)
    }
}
