//! Error types for the alerting core.

use std::fmt;

use thiserror::Error;

/// Which limit a capacity error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityKind {
    /// An organisation quota was exhausted.
    Quota,
    /// A concurrency limit was reached.
    Concurrency,
}

impl fmt::Display for CapacityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quota => write!(f, "quota"),
            Self::Concurrency => write!(f, "concurrency"),
        }
    }
}

/// Errors that can occur in the alerting core.
#[derive(Debug, Error)]
pub enum AlertingError {
    /// A rule or configuration is invalid and was rejected at submission.
    #[error("invalid configuration: {reason}")]
    Config {
        /// The reason the rule is invalid.
        reason: String,
    },

    /// A query or expression failed during an evaluation tick.
    #[error("evaluation failed: {reason}")]
    Evaluation {
        /// The reason the evaluation failed.
        reason: String,
    },

    /// The evaluation did not finish before its deadline.
    #[error("evaluation timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// A store write or read failed.
    #[error("persistence failed: {reason}")]
    Persistence {
        /// The reason the store operation failed.
        reason: String,
    },

    /// Dispatching alerts to a backend failed.
    #[error("delivery failed: {reason}")]
    Delivery {
        /// The reason delivery failed.
        reason: String,
    },

    /// A quota or concurrency limit rejected the request.
    #[error("{kind} limit exceeded: {reason}")]
    Capacity {
        /// The limit that was hit.
        kind: CapacityKind,
        /// Human readable detail.
        reason: String,
    },

    /// The requested entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind, e.g. `rule` or `datasource`.
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// An optimistic-concurrency check on a rule failed.
    #[error("version conflict for rule {uid}: expected version {expected}, stored version is {actual}")]
    VersionConflict {
        /// The rule UID.
        uid: String,
        /// The version supplied by the caller.
        expected: i64,
        /// The version currently stored.
        actual: i64,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The scheduler has been shut down.
    #[error("scheduler is not running")]
    SchedulerStopped,
}

impl AlertingError {
    /// Shorthand for [`AlertingError::Config`].
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`AlertingError::Evaluation`].
    pub fn evaluation(reason: impl Into<String>) -> Self {
        Self::Evaluation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`AlertingError::Persistence`].
    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`AlertingError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Returns true for errors caused by the caller's input.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::NotFound { .. }
                | Self::VersionConflict { .. }
                | Self::Capacity { .. }
        )
    }
}

impl From<serde_json::Error> for AlertingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for alerting core operations.
pub type Result<T> = std::result::Result<T, AlertingError>;
