//! Alert instances: one per rule and label set.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::labels::{ALERTNAME, Fingerprint, Labels, RULE_UID};
use crate::rule::AlertRule;

/// Lifecycle state of an alert instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Condition not met.
    #[default]
    Normal,
    /// Condition met, waiting for the pending duration to elapse.
    Pending,
    /// Firing.
    Alerting,
    /// The query returned no data.
    NoData,
    /// The evaluation failed.
    Error,
}

impl InstanceState {
    /// Returns the state as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Pending => "pending",
            Self::Alerting => "alerting",
            Self::NoData => "nodata",
            Self::Error => "error",
        }
    }

    /// Returns true for any state other than `Normal`.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Normal)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    /// Owning organisation.
    pub org_id: i64,
    /// Owning rule.
    pub rule_uid: String,
    /// Fingerprint of the instance labels.
    pub fingerprint: Fingerprint,
}

/// The tracked state of one rule and label set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertInstance {
    /// Owning organisation.
    pub org_id: i64,
    /// Owning rule.
    pub rule_uid: String,
    /// Title of the owning rule at the last evaluation.
    pub rule_title: String,
    /// Fingerprint of `labels`.
    pub fingerprint: Fingerprint,
    /// Rule labels, series labels and the reserved labels.
    pub labels: Labels,
    /// Rule annotations.
    pub annotations: Labels,
    /// Current state.
    pub current_state: InstanceState,
    /// State before the last transition.
    pub previous_state: InstanceState,
    /// When the current state was entered.
    pub state_since: DateTime<Utc>,
    /// Time of the last evaluation that touched this instance.
    pub last_evaluation_time: DateTime<Utc>,
    /// Reduced values from the last evaluation.
    #[serde(default)]
    pub last_values: BTreeMap<String, f64>,
    /// Error from the last evaluation, if any.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Last time the instance was handed to the notification router.
    #[serde(default)]
    pub last_sent_at: Option<DateTime<Utc>>,
    /// When the instance last left `Alerting`.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set when the owning rule was removed.
    #[serde(default)]
    pub orphaned_at: Option<DateTime<Utc>>,
}

impl AlertInstance {
    /// Builds the full label set of an instance from its rule and series labels.
    #[must_use]
    pub fn instance_labels(rule: &AlertRule, series: &Labels) -> Labels {
        let mut labels = rule.labels.clone();
        labels.merge(series);
        labels.insert(ALERTNAME, rule.title.clone());
        labels.insert(RULE_UID, rule.uid.clone());
        labels
    }

    /// Creates a `Normal` instance first seen at `at`.
    #[must_use]
    pub fn new(rule: &AlertRule, labels: Labels, at: DateTime<Utc>) -> Self {
        Self {
            org_id: rule.org_id,
            rule_uid: rule.uid.clone(),
            rule_title: rule.title.clone(),
            fingerprint: labels.fingerprint(),
            labels,
            annotations: rule.annotations.clone(),
            current_state: InstanceState::Normal,
            previous_state: InstanceState::Normal,
            state_since: at,
            last_evaluation_time: DateTime::<Utc>::MIN_UTC,
            last_values: BTreeMap::new(),
            last_error: None,
            last_sent_at: None,
            resolved_at: None,
            orphaned_at: None,
        }
    }

    /// The instance key.
    #[must_use]
    pub fn key(&self) -> InstanceKey {
        InstanceKey {
            org_id: self.org_id,
            rule_uid: self.rule_uid.clone(),
            fingerprint: self.fingerprint,
        }
    }

    /// Moves the instance to `state` at `at`. A no-op if already there.
    ///
    /// Returns true if the state changed.
    pub fn set_state(&mut self, state: InstanceState, at: DateTime<Utc>) -> bool {
        if self.current_state == state {
            return false;
        }
        if self.current_state == InstanceState::Alerting {
            self.resolved_at = Some(at);
        }
        self.previous_state = self.current_state;
        self.current_state = state;
        self.state_since = at;
        true
    }

    /// Returns true if this instance is firing.
    #[must_use]
    pub fn is_alerting(&self) -> bool {
        self.current_state == InstanceState::Alerting
    }

    /// Returns true if the last transition resolved a firing instance.
    #[must_use]
    pub fn just_resolved(&self) -> bool {
        self.previous_state == InstanceState::Alerting
            && self.current_state != InstanceState::Alerting
    }
}
