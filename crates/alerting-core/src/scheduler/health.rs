//! Per-rule evaluation health.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::eval::{EvalOutcome, EvaluationResult};

/// Summary health of a rule's last evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Not evaluated yet.
    #[default]
    Unknown,
    /// Evaluated successfully.
    Ok,
    /// Evaluated, but the queries returned no data.
    NoData,
    /// The last evaluation failed.
    Error,
}

impl Health {
    /// Returns the health as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ok => "ok",
            Self::NoData => "nodata",
            Self::Error => "error",
        }
    }
}

/// Evaluation bookkeeping for one scheduled rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleHealth {
    /// Time of the last completed evaluation.
    pub last_evaluation: Option<DateTime<Utc>>,
    /// Duration of the last evaluation.
    pub last_duration: Duration,
    /// Health of the last evaluation.
    pub health: Health,
    /// Last error, cleared by a successful evaluation.
    pub last_error: Option<String>,
    /// Completed evaluations.
    pub evaluations: u64,
    /// Evaluations that panicked.
    pub panics: u64,
    /// Ticks dropped because no evaluation slot was free.
    pub dropped_ticks: u64,
    /// Notification batches dropped because the queue was full.
    pub dropped_notifications: u64,
}

impl RuleHealth {
    /// Records the results of one evaluation.
    pub fn record(&mut self, at: DateTime<Utc>, duration: Duration, results: &[EvaluationResult]) {
        self.last_evaluation = Some(at);
        self.last_duration = duration;
        self.evaluations += 1;

        let error = results.iter().find_map(EvaluationResult::error_message);
        if let Some(error) = error {
            self.health = Health::Error;
            self.last_error = Some(error.to_string());
        } else if !results.is_empty() && results.iter().all(|r| r.outcome == EvalOutcome::NoData) {
            self.health = Health::NoData;
            self.last_error = None;
        } else {
            self.health = Health::Ok;
            self.last_error = None;
        }
    }

    /// Records an error outside the evaluation itself.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.health = Health::Error;
        self.last_error = Some(error.into());
    }
}
