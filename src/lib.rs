//! Agent execution orchestrator.
//!
//! `dispatch-rs` routes named tasks to interchangeable LLM providers,
//! enforces per-agent sliding-window rate limits, drives each execution
//! through a monotonic lifecycle state machine, and records usage/cost
//! for downstream billing and analytics.
//!
//! # Architecture
//!
//! ```text
//! caller → Orchestrator::execute(request)
//!   ├── validate request shape
//!   ├── resolve AgentConfig (repository) + merge per-call overrides
//!   ├── RateLimiter::check(agent_id)       — admission, no record yet
//!   ├── resolve Provider (injected registry)
//!   ├── ExecutionRecord: Pending → Running → {Completed | Failed}
//!   │     each transition persisted via ExecutionStore
//!   └── MetricsAggregator ← (success, duration, tokens, cost)
//! ```
//!
//! Admission failures (validation, unknown/inactive agent, rate limit,
//! unknown provider) return before any record exists. Once admitted, every
//! path - including provider failure, timeout, and caller cancellation -
//! ends in a persisted terminal record.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dispatch_rs::config::{AgentConfig, OrchestratorConfig, ProviderId};
//! use dispatch_rs::metrics::MetricsAggregator;
//! use dispatch_rs::orchestrator::Orchestrator;
//! use dispatch_rs::request::ExecutionRequest;
//! use dispatch_rs::store::{AgentConfigRepository, InMemoryAgentRepository, InMemoryExecutionStore};
//!
//! # async fn run() -> Result<(), dispatch_rs::error::DispatchError> {
//! let config = OrchestratorConfig::from_env();
//! let agents = Arc::new(InMemoryAgentRepository::new());
//! agents.upsert(AgentConfig::new("researcher", "gpt-4o-mini", ProviderId::OpenAi))?;
//!
//! let orchestrator = Orchestrator::new(
//!     dispatch_rs::providers::build_registry(&config),
//!     Arc::new(InMemoryExecutionStore::new()),
//!     agents,
//!     Arc::new(MetricsAggregator::new()),
//!     &config,
//! );
//!
//! let outcome = orchestrator
//!     .execute(&ExecutionRequest::new("researcher", "summarize the incident report"))
//!     .await?;
//! println!("{} tokens, cost {}", outcome.usage.total_tokens, outcome.cost);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod ratelimit;
pub mod record;
pub mod request;
pub mod store;

// Re-export key types
pub use config::{AgentConfig, ExecutionOverrides, OrchestratorConfig, ProviderId};
pub use error::{DispatchError, ErrorKind};
pub use metrics::{AgentMetricsSnapshot, ExecutionSample, MetricsAggregator, MetricsSink};
pub use orchestrator::{ExecutionOutcome, Orchestrator, RetryPolicy};
pub use provider::{Provider, ProviderRequest, ProviderResult};
pub use ratelimit::RateLimiter;
pub use record::{ExecutionRecord, ExecutionStatus, RecordUpdate, TokenUsage};
pub use request::ExecutionRequest;
pub use store::{
    AgentConfigRepository, ExecutionStore, InMemoryAgentRepository, InMemoryExecutionStore,
};
