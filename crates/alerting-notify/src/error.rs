//! Error types for the notification router.

use alerting_core::AlertingError;
use thiserror::Error;

/// Errors that can occur while routing notifications.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A label matcher could not be parsed or compiled.
    #[error("invalid matcher {matcher:?}: {reason}")]
    InvalidMatcher {
        /// The offending matcher.
        matcher: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A silence was rejected.
    #[error("invalid silence: {reason}")]
    InvalidSilence {
        /// Why it was rejected.
        reason: String,
    },

    /// Silence with the given ID was not found.
    #[error("silence not found: {id}")]
    SilenceNotFound {
        /// The silence ID that was not found.
        id: String,
    },

    /// An Alertmanager configuration was rejected.
    #[error("invalid alertmanager configuration: {reason}")]
    InvalidConfig {
        /// Why it was rejected.
        reason: String,
    },

    /// Sending alerts to a remote backend failed.
    #[error("delivery to {backend} failed: {reason}")]
    Delivery {
        /// Backend name.
        backend: String,
        /// The reason delivery failed.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl NotifyError {
    /// Shorthand for [`NotifyError::InvalidConfig`].
    pub fn config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for NotifyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<NotifyError> for AlertingError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::InvalidMatcher { .. }
            | NotifyError::InvalidSilence { .. }
            | NotifyError::InvalidConfig { .. } => Self::config(err.to_string()),
            NotifyError::SilenceNotFound { id } => Self::not_found("silence", id),
            NotifyError::Delivery { .. } => Self::Delivery {
                reason: err.to_string(),
            },
            NotifyError::Serialization(msg) => Self::Serialization(msg),
        }
    }
}

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
