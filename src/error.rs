//! Error types for the dispatch orchestrator.
//!
//! Every failure the caller can observe is a [`DispatchError`] variant.
//! Admission failures (validation, lookup, rate limiting) are detected
//! before any execution record exists; execution failures always leave a
//! terminal `Failed` record behind. [`DispatchError::kind`] exposes the
//! stable classification downstream callers branch on.

use thiserror::Error;

/// Stable error classification exposed to callers.
///
/// Admission kinds (`Validation` through `UnknownProvider`) are returned
/// before an execution record is created. Execution kinds (`ProviderFailure`,
/// `Timeout`, `Cancelled`) always accompany a persisted `Failed` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request shape or option values were malformed.
    Validation,
    /// No agent registered under the requested id.
    NotFound,
    /// The agent exists but is disabled.
    Inactive,
    /// Rejected by the per-agent sliding-window rate limiter.
    RateLimited,
    /// No provider registered for the agent's provider id.
    UnknownProvider,
    /// The provider reported a failure during execution.
    ProviderFailure,
    /// The provider call exceeded the configured deadline.
    Timeout,
    /// The caller cancelled the in-flight execution.
    Cancelled,
    /// The execution store rejected a write.
    Store,
    /// The metrics sink rejected a sample.
    Metrics,
}

/// Errors produced by the orchestrator and its collaborators.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request failed shape validation before admission.
    #[error("invalid request: {message}")]
    Validation {
        /// What was malformed.
        message: String,
    },

    /// Agent id is not registered.
    #[error("agent not found: {agent_id}")]
    AgentNotFound {
        /// The unresolved agent id.
        agent_id: String,
    },

    /// Agent is registered but disabled.
    #[error("agent is inactive: {agent_id}")]
    AgentInactive {
        /// The disabled agent id.
        agent_id: String,
    },

    /// Per-agent rate limit exceeded.
    #[error("rate limit exceeded for agent: {agent_id}")]
    RateLimited {
        /// The throttled agent id.
        agent_id: String,
    },

    /// No provider registered under the config's provider id.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// The unresolved provider name.
        name: String,
    },

    /// The provider returned a structured failure.
    #[error("provider failure: {message}")]
    ProviderFailure {
        /// The provider's error message, preserved verbatim.
        message: String,
    },

    /// Provider call exceeded its deadline.
    #[error("provider call timed out after {timeout_secs}s")]
    Timeout {
        /// The deadline that was exceeded, in seconds.
        timeout_secs: u64,
    },

    /// Caller cancelled the execution mid-flight.
    #[error("execution cancelled by caller")]
    Cancelled,

    /// Execution store write failed.
    #[error("store operation failed: {message}")]
    Store {
        /// Underlying store error.
        message: String,
    },

    /// Metrics sink write failed.
    #[error("metrics recording failed: {message}")]
    Metrics {
        /// Underlying sink error.
        message: String,
    },

    /// No API key available when building provider configuration.
    #[error("API key not found in configuration or environment")]
    ApiKeyMissing,
}

impl DispatchError {
    /// Returns the stable [`ErrorKind`] for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::ApiKeyMissing => ErrorKind::Validation,
            Self::AgentNotFound { .. } => ErrorKind::NotFound,
            Self::AgentInactive { .. } => ErrorKind::Inactive,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::UnsupportedProvider { .. } => ErrorKind::UnknownProvider,
            Self::ProviderFailure { .. } => ErrorKind::ProviderFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store { .. } => ErrorKind::Store,
            Self::Metrics { .. } => ErrorKind::Metrics,
        }
    }

    /// True if this error was detected before any execution record existed.
    #[must_use]
    pub const fn is_admission_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::NotFound
                | ErrorKind::Inactive
                | ErrorKind::RateLimited
                | ErrorKind::UnknownProvider
        )
    }
}
