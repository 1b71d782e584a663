//! Execution records and the lifecycle state machine.
//!
//! An [`ExecutionRecord`] is the unit of observability and audit: created in
//! `Pending` at admission, driven through `Running` to a terminal state by
//! the orchestrator, and persisted via the external store at every
//! transition. Transitions are monotonic; terminal states are immutable.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Lifecycle state of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Record created, provider not yet invoked.
    Pending,
    /// Provider call in flight.
    Running,
    /// Provider returned successfully; usage and cost are populated.
    Completed,
    /// Provider reported a failure, timed out, or was cancelled.
    Failed,
}

impl ExecutionStatus {
    /// True for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Transitions are one-directional: `Pending → Running → {Completed |
    /// Failed}`. A `Pending` record may also fail directly when the
    /// `Running` persist itself is what broke.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Token usage statistics from a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Builds a usage block where `total` is derived from the parts.
    #[must_use]
    pub const fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// The persisted audit record for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique execution id.
    pub id: Uuid,
    /// Agent that handled the execution.
    pub agent_id: String,
    /// Task text as submitted.
    pub task: String,
    /// Snapshot of the structured input at admission time.
    pub input: Map<String, Value>,
    /// Current lifecycle state.
    pub status: ExecutionStatus,
    /// When the record was created (admission).
    pub created_at: DateTime<Utc>,
    /// When the provider call started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the execution reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Provider output text (populated on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Token usage (populated on completion, zeroed otherwise).
    pub usage: TokenUsage,
    /// Computed cost in currency units (populated on completion).
    pub cost: Decimal,
    /// Error message (populated on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Creates a fresh `Pending` record from validated request data.
    #[must_use]
    pub fn pending(agent_id: &str, task: &str, input: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            task: task.to_string(),
            input,
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            usage: TokenUsage::default(),
            cost: Decimal::ZERO,
            error: None,
        }
    }
}

/// Partial update applied to a persisted record at a state transition.
///
/// Only set fields are written; the store merges them onto the existing
/// record. Used instead of whole-record writes so concurrent readers of
/// the reporting path never observe a half-built snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordUpdate {
    /// New lifecycle state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    /// Provider call start time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Provider output text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Token usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Computed cost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<Decimal>,
    /// Error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordUpdate {
    /// Update marking the provider call as started.
    #[must_use]
    pub fn running(started_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ExecutionStatus::Running),
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    /// Update for a successful terminal transition.
    #[must_use]
    pub fn completed(output: String, usage: TokenUsage, cost: Decimal) -> Self {
        Self {
            status: Some(ExecutionStatus::Completed),
            completed_at: Some(Utc::now()),
            output: Some(output),
            usage: Some(usage),
            cost: Some(cost),
            ..Self::default()
        }
    }

    /// Update for a failed terminal transition.
    #[must_use]
    pub fn failed(error: String) -> Self {
        Self {
            status: Some(ExecutionStatus::Failed),
            completed_at: Some(Utc::now()),
            error: Some(error),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        use ExecutionStatus::{Completed, Failed, Pending, Running};
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
    }

    #[test]
    fn test_backward_and_terminal_transitions_rejected() {
        use ExecutionStatus::{Completed, Failed, Pending, Running};
        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn test_token_usage_total_derived() {
        let usage = TokenUsage::new(120, 34);
        assert_eq!(usage.total_tokens, 154);
    }

    #[test]
    fn test_pending_record_is_zeroed() {
        let record = ExecutionRecord::pending("a1", "task", Map::new());
        assert_eq!(record.status, ExecutionStatus::Pending);
        assert!(record.started_at.is_none());
        assert!(record.completed_at.is_none());
        assert!(record.output.is_none());
        assert!(record.error.is_none());
        assert_eq!(record.usage, TokenUsage::default());
        assert_eq!(record.cost, Decimal::ZERO);
    }

    #[test]
    fn test_failed_update_sets_completion_time() {
        let update = RecordUpdate::failed("provider exploded".to_string());
        assert_eq!(update.status, Some(ExecutionStatus::Failed));
        assert!(update.completed_at.is_some());
        assert_eq!(update.error.as_deref(), Some("provider exploded"));
        assert!(update.usage.is_none());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExecutionStatus::Running).unwrap_or_default();
        assert_eq!(json, "\"running\"");
    }
}
