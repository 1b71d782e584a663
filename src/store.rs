//! External collaborator contracts: execution persistence and agent
//! configuration lookup.
//!
//! The orchestrator is write-mostly against the store - it persists every
//! transition but never reads a record back to branch on it. Reads exist
//! for external reporting and the windowed metrics queries. In-memory
//! implementations back tests and single-process deployments; production
//! hosts supply their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::DispatchError;
use crate::record::{ExecutionRecord, RecordUpdate};

/// Append/update interface for execution records.
///
/// Implementations must support concurrent independent writes keyed by
/// execution id; no cross-execution locking is required.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persists a new record, returning its id.
    async fn create(&self, record: &ExecutionRecord) -> Result<Uuid, DispatchError>;

    /// Merges a partial update onto an existing record.
    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<(), DispatchError>;

    /// Fetches a record by id (reporting path).
    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, DispatchError>;

    /// Fetches all records for an agent (reporting/metrics path).
    async fn list_for_agent(&self, agent_id: &str) -> Result<Vec<ExecutionRecord>, DispatchError>;
}

/// Read interface for per-agent configuration.
///
/// Reads return a value copy, so an in-flight execution never observes a
/// concurrent update; updates are atomic whole-config swaps.
pub trait AgentConfigRepository: Send + Sync {
    /// Looks up an agent's config by id.
    fn get(&self, agent_id: &str) -> Option<AgentConfig>;

    /// Registers or replaces an agent's config.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Validation`] when the config fails field
    /// validation.
    fn upsert(&self, config: AgentConfig) -> Result<(), DispatchError>;
}

/// Dashmap-backed [`ExecutionStore`] for tests and single-process hosts.
#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    records: DashMap<Uuid, ExecutionRecord>,
}

impl InMemoryExecutionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn apply_update(record: &mut ExecutionRecord, update: RecordUpdate) -> Result<(), DispatchError> {
    if let Some(status) = update.status {
        if !record.status.can_transition_to(status) {
            return Err(DispatchError::Store {
                message: format!(
                    "illegal transition {} -> {} for record {}",
                    record.status, status, record.id
                ),
            });
        }
        record.status = status;
    }
    if let Some(started_at) = update.started_at {
        record.started_at = Some(started_at);
    }
    if let Some(completed_at) = update.completed_at {
        record.completed_at = Some(completed_at);
    }
    if let Some(output) = update.output {
        record.output = Some(output);
    }
    if let Some(usage) = update.usage {
        record.usage = usage;
    }
    if let Some(cost) = update.cost {
        record.cost = cost;
    }
    if let Some(error) = update.error {
        record.error = Some(error);
    }
    Ok(())
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, record: &ExecutionRecord) -> Result<Uuid, DispatchError> {
        self.records.insert(record.id, record.clone());
        Ok(record.id)
    }

    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<(), DispatchError> {
        let mut entry = self.records.get_mut(&id).ok_or_else(|| DispatchError::Store {
            message: format!("no record with id {id}"),
        })?;
        apply_update(entry.value_mut(), update)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, DispatchError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn list_for_agent(&self, agent_id: &str) -> Result<Vec<ExecutionRecord>, DispatchError> {
        let mut records: Vec<ExecutionRecord> = self
            .records
            .iter()
            .filter(|r| r.value().agent_id == agent_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

/// Dashmap-backed [`AgentConfigRepository`].
#[derive(Debug, Default)]
pub struct InMemoryAgentRepository {
    configs: DashMap<String, AgentConfig>,
}

impl InMemoryAgentRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentConfigRepository for InMemoryAgentRepository {
    fn get(&self, agent_id: &str) -> Option<AgentConfig> {
        self.configs.get(agent_id).map(|c| c.value().clone())
    }

    fn upsert(&self, config: AgentConfig) -> Result<(), DispatchError> {
        config.validate()?;
        self.configs.insert(config.agent_id.clone(), config);
        Ok(())
    }
}

/// Timestamp filter helper shared by the metrics read path.
#[must_use]
pub fn created_since(records: &[ExecutionRecord], since: DateTime<Utc>) -> Vec<&ExecutionRecord> {
    records.iter().filter(|r| r.created_at >= since).collect()
}
