//! Caller-facing execution request.
//!
//! An [`ExecutionRequest`] is transient: it exists for the duration of one
//! `Orchestrator::execute` call. Shape validation happens before any record
//! is created, so a malformed request never leaves an audit trail.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ExecutionOverrides;
use crate::error::DispatchError;

/// Maximum byte length of the free-text task.
const MAX_TASK_LEN: usize = 100_000;

/// One task submission against a named agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Target agent id.
    pub agent_id: String,
    /// Free-text task description.
    pub task: String,
    /// Structured input passed to the provider alongside the task.
    #[serde(default)]
    pub input: Map<String, Value>,
    /// Optional contextual key/values (correlation ids, tenant, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
    /// Optional per-call configuration overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<ExecutionOverrides>,
}

impl ExecutionRequest {
    /// Creates a request with no input, context, or overrides.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task: task.into(),
            input: Map::new(),
            context: None,
            overrides: None,
        }
    }

    /// Attaches per-call overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ExecutionOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Validates request shape and override value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Validation`] when the agent id or task is
    /// empty, the task exceeds the size cap, or an override value is out
    /// of range.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.agent_id.trim().is_empty() {
            return Err(DispatchError::Validation {
                message: "agent_id is required".to_string(),
            });
        }
        if self.task.trim().is_empty() {
            return Err(DispatchError::Validation {
                message: "task cannot be empty".to_string(),
            });
        }
        if self.task.len() > MAX_TASK_LEN {
            return Err(DispatchError::Validation {
                message: format!(
                    "task exceeds maximum length ({} bytes, max {MAX_TASK_LEN})",
                    self.task.len()
                ),
            });
        }
        if let Some(ref overrides) = self.overrides {
            overrides.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_request() {
        let request = ExecutionRequest::new("a1", "summarize the attached report");
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_missing_agent_id() {
        let request = ExecutionRequest::new("", "do something");
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("agent_id"));
    }

    #[test]
    fn test_empty_task() {
        let request = ExecutionRequest::new("a1", "   ");
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_oversized_task() {
        let request = ExecutionRequest::new("a1", "x".repeat(MAX_TASK_LEN + 1));
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_malformed_override_rejected() {
        let request = ExecutionRequest::new("a1", "task").with_overrides(ExecutionOverrides {
            temperature: Some(2.0),
            ..ExecutionOverrides::default()
        });
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_serialization_omits_empty_optionals() {
        let request = ExecutionRequest::new("a1", "task");
        let json = serde_json::to_string(&request).unwrap_or_default();
        assert!(!json.contains("context"));
        assert!(!json.contains("overrides"));
    }
}
