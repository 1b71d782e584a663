//! Rolling per-agent execution metrics.
//!
//! The in-memory [`MetricsAggregator`] is a cheap current snapshot fed by
//! the orchestrator after every terminal transition. Time-windowed queries
//! go through [`metrics_since`], which filters persisted records instead
//! of the aggregate, so the snapshot never needs historical state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::DispatchError;
use crate::record::ExecutionStatus;
use crate::store::ExecutionStore;

/// One terminal execution reported to the sink.
#[derive(Debug, Clone)]
pub struct ExecutionSample {
    /// Agent that ran.
    pub agent_id: String,
    /// Whether the execution completed successfully.
    pub success: bool,
    /// Wall-clock duration of the provider call.
    pub duration: Duration,
    /// Total tokens consumed.
    pub total_tokens: u32,
    /// Computed cost.
    pub cost: Decimal,
}

/// Receiver for execution samples.
///
/// The signature is infallible on purpose: metrics must never fail an
/// execution, so implementations swallow and log their own errors.
pub trait MetricsSink: Send + Sync {
    /// Records one terminal execution.
    fn record(&self, sample: &ExecutionSample);
}

/// Point-in-time aggregate for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentMetricsSnapshot {
    /// Total terminal executions observed.
    pub total_count: u64,
    /// Executions that completed successfully.
    pub success_count: u64,
    /// Latest provider call duration in milliseconds.
    pub latest_duration_ms: u64,
    /// Cumulative tokens across all executions.
    pub total_tokens: u64,
    /// Cumulative cost across all executions.
    pub total_cost: Decimal,
}

impl AgentMetricsSnapshot {
    /// Success ratio in `[0.0, 1.0]`; zero when nothing has run.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_count as f64
        }
    }
}

/// In-memory rolling aggregate keyed by agent id.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    agents: DashMap<String, AgentMetricsSnapshot>,
}

impl MetricsAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot for an agent, if it has run at all.
    #[must_use]
    pub fn snapshot(&self, agent_id: &str) -> Option<AgentMetricsSnapshot> {
        self.agents.get(agent_id).map(|m| m.value().clone())
    }
}

impl MetricsSink for MetricsAggregator {
    fn record(&self, sample: &ExecutionSample) {
        let mut entry = self.agents.entry(sample.agent_id.clone()).or_default();
        let metrics = entry.value_mut();
        metrics.total_count += 1;
        if sample.success {
            metrics.success_count += 1;
        }
        metrics.latest_duration_ms = u64::try_from(sample.duration.as_millis()).unwrap_or(u64::MAX);
        metrics.total_tokens += u64::from(sample.total_tokens);
        metrics.total_cost += sample.cost;
    }
}

/// Computes an agent's aggregate over records created at or after `since`.
///
/// Reads the persisted store rather than the in-memory aggregate, so the
/// window can reach arbitrarily far back regardless of process lifetime.
/// Only terminal records count; pending/running executions are excluded.
///
/// # Errors
///
/// Propagates [`DispatchError::Store`] from the read path.
pub async fn metrics_since(
    store: &dyn ExecutionStore,
    agent_id: &str,
    since: DateTime<Utc>,
) -> Result<AgentMetricsSnapshot, DispatchError> {
    let records = store.list_for_agent(agent_id).await?;

    let mut snapshot = AgentMetricsSnapshot::default();
    for record in crate::store::created_since(&records, since) {
        if !record.status.is_terminal() {
            continue;
        }
        snapshot.total_count += 1;
        if record.status == ExecutionStatus::Completed {
            snapshot.success_count += 1;
        }
        if let (Some(started), Some(completed)) = (record.started_at, record.completed_at) {
            let elapsed = (completed - started).num_milliseconds().max(0);
            snapshot.latest_duration_ms = u64::try_from(elapsed).unwrap_or(0);
        }
        snapshot.total_tokens += u64::from(record.usage.total_tokens);
        snapshot.total_cost += record.cost;
    }
    Ok(snapshot)
}
