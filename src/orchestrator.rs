//! Execution orchestrator and lifecycle state machine.
//!
//! Coordinates one execution end to end: request validation → agent config
//! resolution → override merge → rate-limit admission → provider dispatch →
//! terminal transition → metrics. Admission failures abort before any
//! record exists; once a record is created, every path ends in a terminal
//! `Completed` or `Failed` state - a timeout or cancellation never leaves
//! a record pending.
//!
//! The orchestrator owns no global state: providers, store, repository,
//! and metrics sink are injected at construction and the host process
//! decides their lifetimes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::{AgentConfig, OrchestratorConfig, ProviderId};
use crate::error::DispatchError;
use crate::metrics::{ExecutionSample, MetricsSink};
use crate::provider::{Provider, ProviderRequest, ProviderResult};
use crate::ratelimit::RateLimiter;
use crate::record::{ExecutionRecord, ExecutionStatus, RecordUpdate, TokenUsage};
use crate::request::ExecutionRequest;
use crate::store::{AgentConfigRepository, ExecutionStore};

/// Bounded attempts for store/metrics persistence before alerting.
const PERSIST_ATTEMPTS: u32 = 3;
/// Base backoff between persistence attempts, doubled per retry.
const PERSIST_BACKOFF: Duration = Duration::from_millis(50);

/// Retry strategy for transient provider failures.
///
/// Injected rather than hard-coded; the default performs no retries,
/// leaving retry decisions to the caller. Timeouts and cancellations are
/// never retried regardless of policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total provider attempts (1 = no retries).
    pub max_attempts: u32,
    /// Delay before each retry attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Caller-visible success payload for one execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    /// Persisted record id.
    pub execution_id: Uuid,
    /// Agent that ran.
    pub agent_id: String,
    /// Terminal status (always `Completed` on the `Ok` path).
    pub status: ExecutionStatus,
    /// Provider output text.
    pub output: String,
    /// Token usage for the call.
    pub usage: TokenUsage,
    /// Computed cost in currency units.
    pub cost: Decimal,
    /// Wall-clock duration of the provider call.
    pub duration: Duration,
    /// Why the model stopped generating.
    pub finish_reason: String,
}

/// Drives the execution state machine for every caller.
///
/// Safe to share across tasks: each `execute` call runs to completion
/// independently, and the rate limiter's per-key windows are the only
/// mutable state shared between concurrent calls.
pub struct Orchestrator {
    providers: HashMap<ProviderId, Arc<dyn Provider>>,
    store: Arc<dyn ExecutionStore>,
    agents: Arc<dyn AgentConfigRepository>,
    metrics: Arc<dyn MetricsSink>,
    rate_limiter: RateLimiter,
    default_requests_per_minute: u32,
    retry_policy: RetryPolicy,
    timeout: Duration,
}

impl Orchestrator {
    /// Creates an orchestrator from injected collaborators.
    ///
    /// The provider map is immutable for the orchestrator's lifetime; the
    /// host wires it up (normally via
    /// [`providers::build_registry`](crate::providers::build_registry)).
    #[must_use]
    pub fn new(
        providers: HashMap<ProviderId, Arc<dyn Provider>>,
        store: Arc<dyn ExecutionStore>,
        agents: Arc<dyn AgentConfigRepository>,
        metrics: Arc<dyn MetricsSink>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            providers,
            store,
            agents,
            metrics,
            rate_limiter: RateLimiter::new(config.rate_window),
            default_requests_per_minute: config.default_requests_per_minute,
            retry_policy: RetryPolicy::default(),
            timeout: config.timeout,
        }
    }

    /// Replaces the provider-failure retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Executes a request to completion without external cancellation.
    ///
    /// # Errors
    ///
    /// Admission errors (`Validation`, `NotFound`, `Inactive`,
    /// `RateLimited`, `UnknownProvider`) abort before any record exists.
    /// Execution errors (`ProviderFailure`, `Timeout`) are returned after
    /// a terminal `Failed` record has been persisted.
    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, DispatchError> {
        self.execute_with_cancellation(request, &CancellationToken::new())
            .await
    }

    /// Executes a request, aborting early when `token` is cancelled.
    ///
    /// Cancellation cancels the in-flight provider call and still
    /// persists a terminal `Failed` record on a best-effort basis before
    /// returning [`DispatchError::Cancelled`].
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::execute`], plus `Cancelled`.
    pub async fn execute_with_cancellation(
        &self,
        request: &ExecutionRequest,
        token: &CancellationToken,
    ) -> Result<ExecutionOutcome, DispatchError> {
        // Steps 1-5: admission. No record exists yet, so failures here
        // return synchronously and leave no audit trail.
        request.validate()?;

        let config = self
            .agents
            .get(&request.agent_id)
            .ok_or_else(|| DispatchError::AgentNotFound {
                agent_id: request.agent_id.clone(),
            })?;
        if !config.is_active {
            return Err(DispatchError::AgentInactive {
                agent_id: request.agent_id.clone(),
            });
        }

        let config = request
            .overrides
            .as_ref()
            .map_or_else(|| config.clone(), |overrides| config.merged(overrides));

        // An agent limit of zero means "inherit the deployment default".
        let capacity = match config.rate_limit.requests_per_minute {
            0 => self.default_requests_per_minute,
            n => n,
        };
        if !self.rate_limiter.check(&config.agent_id, capacity) {
            debug!(agent_id = %config.agent_id, "rate limit rejection");
            return Err(DispatchError::RateLimited {
                agent_id: config.agent_id.clone(),
            });
        }

        let provider = self
            .providers
            .get(&config.provider)
            .ok_or_else(|| DispatchError::UnsupportedProvider {
                name: config.provider.to_string(),
            })?
            .clone();

        // Step 6: the record exists from here on; every remaining path
        // must drive it to a terminal state.
        let record = ExecutionRecord::pending(&config.agent_id, &request.task, request.input.clone());
        let execution_id = record.id;
        self.persist_create(&record).await;

        debug!(
            %execution_id,
            agent_id = %config.agent_id,
            provider = %config.provider,
            model = %config.model,
            "execution admitted"
        );

        // Step 7: transition to Running.
        self.persist_update(execution_id, RecordUpdate::running(Utc::now()))
            .await;

        // Step 8: provider invocation under deadline and cancellation.
        let provider_request = Self::build_provider_request(&config, request);
        let started = Instant::now();
        let result = self
            .invoke_provider(provider.as_ref(), &config, &provider_request, token)
            .await;

        match result {
            Ok(provider_result) if !provider_result.is_error() => {
                let cost = provider.calculate_cost(provider_result.usage.total_tokens, &config.model);
                self.persist_update(
                    execution_id,
                    RecordUpdate::completed(
                        provider_result.output.clone(),
                        provider_result.usage,
                        cost,
                    ),
                )
                .await;
                self.report_metrics(&config.agent_id, true, &provider_result, cost);

                Ok(ExecutionOutcome {
                    execution_id,
                    agent_id: config.agent_id,
                    status: ExecutionStatus::Completed,
                    output: provider_result.output,
                    usage: provider_result.usage,
                    cost,
                    duration: provider_result.duration,
                    finish_reason: provider_result.finish_reason,
                })
            }
            Ok(provider_result) => {
                let message = provider_result
                    .error
                    .clone()
                    .unwrap_or_else(|| "provider returned an unspecified error".to_string());
                self.fail_execution(execution_id, &config.agent_id, &message, started.elapsed())
                    .await;
                Err(DispatchError::ProviderFailure { message })
            }
            Err(err) => {
                // Timeout or cancellation; best-effort terminal persist.
                self.fail_execution(
                    execution_id,
                    &config.agent_id,
                    &err.to_string(),
                    started.elapsed(),
                )
                .await;
                Err(err)
            }
        }
    }

    /// Runs the provider call under the configured deadline, the caller's
    /// cancellation token, and the injected retry policy.
    ///
    /// Returns `Ok` with the provider's (possibly failed) result, or `Err`
    /// for timeout/cancellation.
    async fn invoke_provider(
        &self,
        provider: &dyn Provider,
        config: &AgentConfig,
        request: &ProviderRequest,
        token: &CancellationToken,
    ) -> Result<ProviderResult, DispatchError> {
        let attempts = self.retry_policy.max_attempts.max(1);
        let mut last_result: Option<ProviderResult> = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.retry_policy.backoff).await;
            }

            let result = tokio::select! {
                () = token.cancelled() => return Err(DispatchError::Cancelled),
                outcome = tokio::time::timeout(self.timeout, provider.execute(config, request)) => {
                    outcome.map_err(|_| DispatchError::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    })?
                }
            };

            if !result.is_error() {
                return Ok(result);
            }
            warn!(
                agent_id = %config.agent_id,
                attempt,
                error = result.error.as_deref().unwrap_or(""),
                "provider attempt failed"
            );
            last_result = Some(result);
        }

        last_result.map_or_else(
            || {
                Ok(ProviderResult::failure(
                    "provider produced no result",
                    Duration::ZERO,
                ))
            },
            Ok,
        )
    }

    /// Persists the terminal `Failed` transition and reports metrics.
    async fn fail_execution(
        &self,
        execution_id: Uuid,
        agent_id: &str,
        message: &str,
        duration: Duration,
    ) {
        self.persist_update(execution_id, RecordUpdate::failed(message.to_string()))
            .await;
        let failed = ProviderResult::failure(message, duration);
        self.report_metrics(agent_id, false, &failed, Decimal::ZERO);
    }

    /// Renders the provider-agnostic request from merged config plus the
    /// caller's task and structured input.
    fn build_provider_request(config: &AgentConfig, request: &ExecutionRequest) -> ProviderRequest {
        let user_content = if request.input.is_empty() {
            request.task.clone()
        } else {
            let input = serde_json::to_string_pretty(&request.input)
                .unwrap_or_else(|_| "{}".to_string());
            format!("{}\n\nInput:\n{input}", request.task)
        };

        ProviderRequest {
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
            user_content,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            stream: request
                .overrides
                .as_ref()
                .and_then(|o| o.stream)
                .unwrap_or(false),
        }
    }

    /// Creates the record with bounded retry; infrastructure failures are
    /// logged and never abort the execution.
    async fn persist_create(&self, record: &ExecutionRecord) {
        for attempt in 0..PERSIST_ATTEMPTS {
            match self.store.create(record).await {
                Ok(_) => return,
                Err(e) => {
                    warn!(execution_id = %record.id, attempt, error = %e, "record create failed");
                    tokio::time::sleep(PERSIST_BACKOFF * 2u32.pow(attempt)).await;
                }
            }
        }
        error!(
            execution_id = %record.id,
            agent_id = %record.agent_id,
            "record create exhausted retries; execution continues unpersisted"
        );
    }

    /// Applies a record update with bounded retry; infrastructure failures
    /// are logged and never abort the execution.
    async fn persist_update(&self, id: Uuid, update: RecordUpdate) {
        for attempt in 0..PERSIST_ATTEMPTS {
            let result = self.store.update(id, update.clone()).await;
            match result {
                Ok(()) => return,
                Err(e) => {
                    warn!(execution_id = %id, attempt, error = %e, "record update failed");
                    tokio::time::sleep(PERSIST_BACKOFF * 2u32.pow(attempt)).await;
                }
            }
        }
        error!(execution_id = %id, "record update exhausted retries");
    }

    /// Reports a terminal sample; the sink is fire-and-forget.
    fn report_metrics(&self, agent_id: &str, success: bool, result: &ProviderResult, cost: Decimal) {
        self.metrics.record(&ExecutionSample {
            agent_id: agent_id.to_string(),
            success,
            duration: result.duration,
            total_tokens: result.usage.total_tokens,
            cost,
        });
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let provider_ids: Vec<&str> = self.providers.keys().map(|id| id.as_str()).collect();
        f.debug_struct("Orchestrator")
            .field("providers", &provider_ids)
            .field("retry_policy", &self.retry_policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::{ExecutionOverrides, RateLimitSettings};
    use crate::error::ErrorKind;
    use crate::metrics::MetricsAggregator;
    use crate::store::{InMemoryAgentRepository, InMemoryExecutionStore};

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    /// What the mock provider does per call.
    enum MockBehavior {
        /// Succeed with fixed output and usage.
        Succeed,
        /// Always return a normalized failure.
        Fail(String),
        /// Fail the first N calls, then succeed.
        FailTimes(usize),
        /// Sleep before succeeding (for timeout/cancel tests).
        Delay(Duration),
    }

    struct MockProvider {
        behavior: MockBehavior,
        call_count: AtomicUsize,
        last_request: Mutex<Option<ProviderRequest>>,
    }

    impl MockProvider {
        fn new(behavior: MockBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                call_count: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            })
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        fn success_result() -> ProviderResult {
            ProviderResult::success(
                "mock output".to_string(),
                TokenUsage::new(100, 40),
                Duration::from_millis(20),
                "stop".to_string(),
            )
        }
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn id(&self) -> ProviderId {
            ProviderId::OpenAi
        }

        async fn execute(&self, _config: &AgentConfig, request: &ProviderRequest) -> ProviderResult {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut guard) = self.last_request.lock() {
                *guard = Some(request.clone());
            }

            match &self.behavior {
                MockBehavior::Succeed => Self::success_result(),
                MockBehavior::Fail(message) => {
                    ProviderResult::failure(message.clone(), Duration::from_millis(5))
                }
                MockBehavior::FailTimes(n) => {
                    if count < *n {
                        ProviderResult::failure("transient", Duration::from_millis(5))
                    } else {
                        Self::success_result()
                    }
                }
                MockBehavior::Delay(duration) => {
                    tokio::time::sleep(*duration).await;
                    Self::success_result()
                }
            }
        }

        fn models(&self) -> &[&str] {
            &["mock-model"]
        }

        fn calculate_cost(&self, total_tokens: u32, _model: &str) -> Decimal {
            // 0.001 per token, easy to assert against.
            Decimal::from(total_tokens) * Decimal::new(1, 3)
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<InMemoryExecutionStore>,
        metrics: Arc<MetricsAggregator>,
        provider: Arc<MockProvider>,
    }

    fn harness(provider: Arc<MockProvider>) -> Harness {
        harness_with(provider, |_| {})
    }

    fn harness_with(
        provider: Arc<MockProvider>,
        tweak: impl FnOnce(&mut AgentConfig),
    ) -> Harness {
        let store = Arc::new(InMemoryExecutionStore::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let agents = Arc::new(InMemoryAgentRepository::new());

        let mut config = AgentConfig::new("a1", "mock-model", ProviderId::OpenAi);
        config.rate_limit = RateLimitSettings {
            requests_per_minute: 100,
            tokens_per_minute: 100_000,
        };
        tweak(&mut config);
        agents
            .upsert(config)
            .unwrap_or_else(|e| panic!("upsert failed: {e}"));

        let mut providers: HashMap<ProviderId, Arc<dyn Provider>> = HashMap::new();
        providers.insert(ProviderId::OpenAi, provider.clone());

        let orchestrator_config = OrchestratorConfig::builder()
            .timeout(Duration::from_secs(5))
            .build();
        let orchestrator = Orchestrator::new(
            providers,
            store.clone(),
            agents,
            metrics.clone(),
            &orchestrator_config,
        );

        Harness {
            orchestrator,
            store,
            metrics,
            provider,
        }
    }

    async fn only_record(store: &InMemoryExecutionStore, agent_id: &str) -> ExecutionRecord {
        let records = store
            .list_for_agent(agent_id)
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert_eq!(records.len(), 1, "expected exactly one record");
        records.into_iter().next().unwrap_or_else(|| panic!("record missing"))
    }

    #[tokio::test]
    async fn test_successful_execution_completes_record() {
        let h = harness(MockProvider::new(MockBehavior::Succeed));
        let request = ExecutionRequest::new("a1", "summarize");

        let outcome = h
            .orchestrator
            .execute(&request)
            .await
            .unwrap_or_else(|e| panic!("execute failed: {e}"));

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.output, "mock output");
        assert_eq!(
            outcome.usage.total_tokens,
            outcome.usage.prompt_tokens + outcome.usage.completion_tokens
        );
        assert!(outcome.cost >= Decimal::ZERO);
        assert_eq!(outcome.cost, Decimal::new(140, 3)); // 140 tokens * 0.001

        let record = only_record(&h.store, "a1").await;
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.id, outcome.execution_id);
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert_eq!(record.usage, outcome.usage);
        assert_eq!(record.cost, outcome.cost);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_validation_failure_creates_no_record() {
        let h = harness(MockProvider::new(MockBehavior::Succeed));
        let request = ExecutionRequest::new("a1", "");

        let err = h.orchestrator.execute(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(h.store.is_empty());
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_agent_returns_not_found() {
        // Scenario B: unregistered agent id, zero records created.
        let h = harness(MockProvider::new(MockBehavior::Succeed));
        let request = ExecutionRequest::new("does-not-exist", "task");

        let err = h.orchestrator.execute(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_agent_rejected() {
        let h = harness_with(MockProvider::new(MockBehavior::Succeed), |c| {
            c.is_active = false;
        });
        let request = ExecutionRequest::new("a1", "task");

        let err = h.orchestrator.execute(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Inactive);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_provider_rejected() {
        let h = harness_with(MockProvider::new(MockBehavior::Succeed), |c| {
            c.provider = ProviderId::Anthropic; // registry only has OpenAi
        });
        let request = ExecutionRequest::new("a1", "task");

        let err = h.orchestrator.execute(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownProvider);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_third_call_rejected() {
        // Scenario A: limit 2, three rapid calls: two admitted, one
        // rejected with no record.
        let h = harness_with(MockProvider::new(MockBehavior::Succeed), |c| {
            c.rate_limit.requests_per_minute = 2;
        });
        let request = ExecutionRequest::new("a1", "task");

        let first = h.orchestrator.execute(&request).await;
        let second = h.orchestrator.execute(&request).await;
        let third = h.orchestrator.execute(&request).await;

        assert!(first.is_ok());
        assert!(second.is_ok());
        let err = third.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(h.store.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_agent_limit_inherits_deployment_default() {
        let provider = MockProvider::new(MockBehavior::Succeed);
        let store = Arc::new(InMemoryExecutionStore::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let agents = Arc::new(InMemoryAgentRepository::new());

        let mut config = AgentConfig::new("a1", "mock-model", ProviderId::OpenAi);
        config.rate_limit.requests_per_minute = 0;
        agents
            .upsert(config)
            .unwrap_or_else(|e| panic!("upsert failed: {e}"));

        let mut providers: HashMap<ProviderId, Arc<dyn Provider>> = HashMap::new();
        providers.insert(ProviderId::OpenAi, provider);

        let orchestrator_config = OrchestratorConfig::builder()
            .default_requests_per_minute(1)
            .timeout(Duration::from_secs(5))
            .build();
        let orchestrator =
            Orchestrator::new(providers, store, agents, metrics, &orchestrator_config);
        let request = ExecutionRequest::new("a1", "task");

        assert!(orchestrator.execute(&request).await.is_ok());
        let err = orchestrator.execute(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_provider_failure_persists_failed_record() {
        // Scenario C: record ends Failed carrying the provider's exact
        // error string; total count up, success count unchanged.
        let h = harness(MockProvider::new(MockBehavior::Fail(
            "upstream quota exhausted".to_string(),
        )));
        let request = ExecutionRequest::new("a1", "task");

        let err = h.orchestrator.execute(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);

        let record = only_record(&h.store, "a1").await;
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.completed_at.is_some());
        assert_eq!(record.error.as_deref(), Some("upstream quota exhausted"));
        assert_eq!(record.usage, TokenUsage::default());

        let snapshot = h
            .metrics
            .snapshot("a1")
            .unwrap_or_else(|| panic!("snapshot missing"));
        assert_eq!(snapshot.total_count, 1);
        assert_eq!(snapshot.success_count, 0);
    }

    #[tokio::test]
    async fn test_timeout_produces_failed_record() {
        let provider = MockProvider::new(MockBehavior::Delay(Duration::from_secs(60)));
        let store = Arc::new(InMemoryExecutionStore::new());
        let metrics = Arc::new(MetricsAggregator::new());
        let agents = Arc::new(InMemoryAgentRepository::new());
        agents
            .upsert(AgentConfig::new("a1", "mock-model", ProviderId::OpenAi))
            .unwrap_or_else(|e| panic!("upsert failed: {e}"));

        let mut providers: HashMap<ProviderId, Arc<dyn Provider>> = HashMap::new();
        providers.insert(ProviderId::OpenAi, provider);

        let config = OrchestratorConfig::builder()
            .timeout(Duration::from_millis(50))
            .build();
        let orchestrator = Orchestrator::new(providers, store.clone(), agents, metrics, &config);

        let err = orchestrator
            .execute(&ExecutionRequest::new("a1", "task"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let record = only_record(&store, "a1").await;
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.completed_at.is_some());
        assert!(
            record
                .error
                .as_deref()
                .unwrap_or("")
                .contains("timed out")
        );
    }

    #[tokio::test]
    async fn test_cancellation_produces_failed_record() {
        // Scenario D: cancelled mid-call, Failed record within a bounded
        // grace period.
        let h = harness(MockProvider::new(MockBehavior::Delay(Duration::from_secs(60))));
        let request = ExecutionRequest::new("a1", "task");

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = h
            .orchestrator
            .execute_with_cancellation(&request, &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));

        let record = only_record(&h.store, "a1").await;
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.completed_at.is_some());
        assert!(
            record
                .error
                .as_deref()
                .unwrap_or("")
                .contains("cancelled")
        );
    }

    #[tokio::test]
    async fn test_overrides_reach_the_provider() {
        let h = harness(MockProvider::new(MockBehavior::Succeed));
        let request = ExecutionRequest::new("a1", "task").with_overrides(ExecutionOverrides {
            temperature: Some(0.7),
            max_output_tokens: Some(99),
            system_prompt: Some("override prompt".to_string()),
            stream: None,
        });

        h.orchestrator
            .execute(&request)
            .await
            .unwrap_or_else(|e| panic!("execute failed: {e}"));

        let seen = h
            .provider
            .last_request
            .lock()
            .unwrap_or_else(|e| panic!("lock poisoned: {e}"))
            .clone()
            .unwrap_or_else(|| panic!("provider never called"));
        assert!((seen.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(seen.max_output_tokens, 99);
        assert_eq!(seen.system_prompt, "override prompt");
    }

    #[tokio::test]
    async fn test_structured_input_rendered_into_user_content() {
        let h = harness(MockProvider::new(MockBehavior::Succeed));
        let mut request = ExecutionRequest::new("a1", "analyze");
        request
            .input
            .insert("region".to_string(), serde_json::json!("emea"));

        h.orchestrator
            .execute(&request)
            .await
            .unwrap_or_else(|e| panic!("execute failed: {e}"));

        let seen = h
            .provider
            .last_request
            .lock()
            .unwrap_or_else(|e| panic!("lock poisoned: {e}"))
            .clone()
            .unwrap_or_else(|| panic!("provider never called"));
        assert!(seen.user_content.starts_with("analyze"));
        assert!(seen.user_content.contains("emea"));
    }

    #[tokio::test]
    async fn test_retry_policy_recovers_transient_failure() {
        let provider = MockProvider::new(MockBehavior::FailTimes(2));
        let h = harness(provider.clone());
        let orchestrator = h.orchestrator.with_retry_policy(RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        });

        let outcome = orchestrator
            .execute(&ExecutionRequest::new("a1", "task"))
            .await
            .unwrap_or_else(|e| panic!("execute failed: {e}"));
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_default_policy_does_not_retry() {
        let provider = MockProvider::new(MockBehavior::Fail("boom".to_string()));
        let h = harness(provider.clone());

        let err = h
            .orchestrator
            .execute(&ExecutionRequest::new("a1", "task"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_executions_all_reach_terminal_state() {
        let h = harness(MockProvider::new(MockBehavior::Succeed));
        let orchestrator = Arc::new(h.orchestrator);

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    orchestrator
                        .execute(&ExecutionRequest::new("a1", format!("task {i}")))
                        .await
                })
            })
            .collect();

        for handle in handles {
            let result = handle
                .await
                .unwrap_or_else(|e| panic!("join failed: {e}"));
            assert!(result.is_ok());
        }

        let records = h
            .store
            .list_for_agent("a1")
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert_eq!(records.len(), 10);
        assert!(records.iter().all(|r| r.status.is_terminal()));

        let snapshot = h
            .metrics
            .snapshot("a1")
            .unwrap_or_else(|| panic!("snapshot missing"));
        assert_eq!(snapshot.total_count, 10);
        assert_eq!(snapshot.success_count, 10);
    }
}
