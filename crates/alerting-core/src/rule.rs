//! Alert rule definitions.
//!
//! - [`AlertRule`]: a user-defined rule, versioned by the rule store
//! - [`AlertQuery`]: one query the rule runs on every tick
//! - [`Condition`]: how the condition query's series are reduced and compared
//! - [`RuleLimits`]: validation limits applied when a rule is submitted

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AlertingError, Result};
use crate::labels::Labels;

/// Identifies a rule across organisations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleKey {
    /// Owning organisation.
    pub org_id: i64,
    /// Rule UID, unique within the organisation.
    pub uid: String,
}

impl RuleKey {
    /// Creates a rule key.
    pub fn new(org_id: i64, uid: impl Into<String>) -> Self {
        Self {
            org_id,
            uid: uid.into(),
        }
    }
}

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org_id, self.uid)
    }
}

/// Comparison operators for rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    /// Greater than (>).
    #[serde(rename = ">")]
    GreaterThan,
    /// Greater than or equal (>=).
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    /// Less than (<).
    #[serde(rename = "<")]
    LessThan,
    /// Less than or equal (<=).
    #[serde(rename = "<=")]
    LessThanOrEqual,
    /// Equal (==).
    #[serde(rename = "==")]
    Equal,
    /// Not equal (!=).
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    /// Compares `left` against `right`.
    #[must_use]
    pub fn evaluate(&self, left: f64, right: f64) -> bool {
        match self {
            Self::GreaterThan => left > right,
            Self::GreaterThanOrEqual => left >= right,
            Self::LessThan => left < right,
            Self::LessThanOrEqual => left <= right,
            Self::Equal => (left - right).abs() < f64::EPSILON,
            Self::NotEqual => (left - right).abs() >= f64::EPSILON,
        }
    }

    /// Returns the operator symbol.
    #[must_use]
    pub const fn as_symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_symbol())
    }
}

/// Reduces a series to a single value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    /// Most recent sample.
    #[default]
    Last,
    /// Arithmetic mean.
    Mean,
    /// Smallest sample.
    Min,
    /// Largest sample.
    Max,
    /// Sum of samples.
    Sum,
    /// Number of samples.
    Count,
}

impl Reducer {
    /// Applies the reducer. Returns `None` for an empty input.
    #[must_use]
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        let last = *values.last()?;
        let value = match self {
            Self::Last => last,
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Sum => values.iter().sum(),
            Self::Count => values.len() as f64,
        };
        Some(value)
    }
}

/// Selects the query whose series decide whether the rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Ref id of the query to reduce.
    pub ref_id: String,
    /// Reduction applied to each series.
    #[serde(default)]
    pub reducer: Reducer,
    /// Comparison against the threshold.
    pub operator: ComparisonOperator,
    /// Threshold value.
    pub threshold: f64,
}

impl Condition {
    /// Creates a condition on the given query.
    pub fn new(ref_id: impl Into<String>, operator: ComparisonOperator, threshold: f64) -> Self {
        Self {
            ref_id: ref_id.into(),
            reducer: Reducer::Last,
            operator,
            threshold,
        }
    }

    /// Sets the reducer.
    #[must_use]
    pub const fn with_reducer(mut self, reducer: Reducer) -> Self {
        self.reducer = reducer;
        self
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}({}) {} {}",
            self.reducer, self.ref_id, self.operator, self.threshold
        )
    }
}

/// Time range a query covers, relative to the evaluation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeTimeRange {
    /// Seconds before now at which the range starts.
    pub from: u64,
    /// Seconds before now at which the range ends.
    pub to: u64,
}

/// A query executed on every evaluation of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertQuery {
    /// Identifier referenced by the condition.
    pub ref_id: String,
    /// Datasource the query runs against.
    pub datasource_uid: String,
    /// Datasource specific query model, passed through untouched.
    #[serde(default)]
    pub model: serde_json::Value,
    /// Range of data the query covers.
    #[serde(default)]
    pub relative_time_range: RelativeTimeRange,
}

impl AlertQuery {
    /// Creates a query with an opaque model.
    pub fn new(
        ref_id: impl Into<String>,
        datasource_uid: impl Into<String>,
        model: serde_json::Value,
    ) -> Self {
        Self {
            ref_id: ref_id.into(),
            datasource_uid: datasource_uid.into(),
            model,
            relative_time_range: RelativeTimeRange { from: 600, to: 0 },
        }
    }
}

/// State an instance takes when its query returns no data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoDataState {
    /// Treat as firing.
    Alerting,
    /// Move to the `NoData` state.
    #[default]
    NoData,
    /// Treat as normal.
    #[serde(rename = "OK")]
    Ok,
    /// Keep whatever state the instance was in.
    KeepLast,
}

/// State an instance takes when evaluation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecErrState {
    /// Treat as firing.
    Alerting,
    /// Move to the `Error` state.
    #[default]
    Error,
    /// Treat as normal.
    #[serde(rename = "OK")]
    Ok,
    /// Keep whatever state the instance was in.
    KeepLast,
}

/// Limits applied when a rule is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleLimits {
    /// Smallest accepted evaluation interval.
    pub min_interval: Duration,
    /// Intervals must be a multiple of this.
    pub base_interval: Duration,
    /// Longest accepted title.
    pub max_title_len: usize,
}

impl Default for RuleLimits {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(10),
            base_interval: Duration::from_secs(10),
            max_title_len: 190,
        }
    }
}

/// A user-defined alerting rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRule {
    /// Owning organisation.
    #[serde(default = "default_org_id")]
    pub org_id: i64,
    /// Unique identifier within the organisation.
    pub uid: String,
    /// Human readable title, also the `alertname` label.
    pub title: String,
    /// Folder the rule lives in.
    #[serde(default)]
    pub namespace_uid: String,
    /// Group the rule belongs to.
    #[serde(default)]
    pub rule_group: String,
    /// Queries run on every tick.
    pub queries: Vec<AlertQuery>,
    /// Firing condition.
    pub condition: Condition,
    /// Evaluation interval in seconds.
    pub interval_seconds: u64,
    /// How long the condition must hold before firing, in seconds.
    #[serde(default, rename = "for")]
    pub for_seconds: u64,
    /// Behaviour on empty query results.
    #[serde(default)]
    pub no_data_state: NoDataState,
    /// Behaviour on evaluation failure.
    #[serde(default)]
    pub exec_err_state: ExecErrState,
    /// Labels added to every instance.
    #[serde(default)]
    pub labels: Labels,
    /// Annotations added to every instance.
    #[serde(default)]
    pub annotations: Labels,
    /// Store version; 0 for a rule that has never been stored.
    #[serde(default)]
    pub version: i64,
    /// Last time the stored rule changed.
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

const fn default_org_id() -> i64 {
    1
}

impl AlertRule {
    /// Creates a new rule builder.
    pub fn builder(
        uid: impl Into<String>,
        title: impl Into<String>,
        condition: Condition,
    ) -> AlertRuleBuilder {
        AlertRuleBuilder::new(uid, title, condition)
    }

    /// The key identifying this rule.
    #[must_use]
    pub fn key(&self) -> RuleKey {
        RuleKey::new(self.org_id, self.uid.clone())
    }

    /// Evaluation interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Pending duration before firing.
    #[must_use]
    pub const fn for_duration(&self) -> Duration {
        Duration::from_secs(self.for_seconds)
    }

    /// Returns true if two definitions differ only in store bookkeeping.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        let mut a = self.clone();
        a.version = other.version;
        a.updated = other.updated;
        a == *other
    }

    /// Validates the rule against the given limits.
    ///
    /// # Errors
    ///
    /// Returns `AlertingError::Config` describing the first violation found.
    pub fn validate(&self, limits: &RuleLimits) -> Result<()> {
        if self.uid.trim().is_empty() {
            return Err(AlertingError::config("rule uid cannot be empty"));
        }
        if self.title.trim().is_empty() {
            return Err(AlertingError::config("rule title cannot be empty"));
        }
        if self.title.chars().count() > limits.max_title_len {
            return Err(AlertingError::config(format!(
                "rule title exceeds maximum length of {} characters",
                limits.max_title_len
            )));
        }
        if self.queries.is_empty() {
            return Err(AlertingError::config("rule must have at least one query"));
        }

        let mut seen = HashSet::new();
        for query in &self.queries {
            if query.ref_id.is_empty() {
                return Err(AlertingError::config("query ref id cannot be empty"));
            }
            if !seen.insert(query.ref_id.as_str()) {
                return Err(AlertingError::config(format!(
                    "duplicate query ref id {:?}",
                    query.ref_id
                )));
            }
        }
        if !seen.contains(self.condition.ref_id.as_str()) {
            return Err(AlertingError::config(format!(
                "condition refers to unknown query {:?}",
                self.condition.ref_id
            )));
        }

        let interval = self.interval();
        if interval < limits.min_interval {
            return Err(AlertingError::config(format!(
                "interval {}s is below the minimum of {}s",
                interval.as_secs(),
                limits.min_interval.as_secs()
            )));
        }
        let base = limits.base_interval.as_secs().max(1);
        if self.interval_seconds % base != 0 {
            return Err(AlertingError::config(format!(
                "interval {}s is not a multiple of the base interval {base}s",
                self.interval_seconds
            )));
        }
        Ok(())
    }
}

/// Builder for [`AlertRule`].
#[derive(Debug)]
pub struct AlertRuleBuilder {
    rule: AlertRule,
}

impl AlertRuleBuilder {
    fn new(uid: impl Into<String>, title: impl Into<String>, condition: Condition) -> Self {
        Self {
            rule: AlertRule {
                org_id: default_org_id(),
                uid: uid.into(),
                title: title.into(),
                namespace_uid: String::new(),
                rule_group: String::new(),
                queries: Vec::new(),
                condition,
                interval_seconds: 60,
                for_seconds: 0,
                no_data_state: NoDataState::default(),
                exec_err_state: ExecErrState::default(),
                labels: Labels::new(),
                annotations: Labels::new(),
                version: 0,
                updated: None,
            },
        }
    }

    /// Sets the owning organisation.
    #[must_use]
    pub const fn org_id(mut self, org_id: i64) -> Self {
        self.rule.org_id = org_id;
        self
    }

    /// Sets the folder and group.
    #[must_use]
    pub fn group(mut self, namespace_uid: impl Into<String>, rule_group: impl Into<String>) -> Self {
        self.rule.namespace_uid = namespace_uid.into();
        self.rule.rule_group = rule_group.into();
        self
    }

    /// Adds a query.
    #[must_use]
    pub fn query(mut self, query: AlertQuery) -> Self {
        self.rule.queries.push(query);
        self
    }

    /// Sets the evaluation interval.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.rule.interval_seconds = interval.as_secs();
        self
    }

    /// Sets the pending duration.
    #[must_use]
    pub const fn for_duration(mut self, duration: Duration) -> Self {
        self.rule.for_seconds = duration.as_secs();
        self
    }

    /// Sets the no-data policy.
    #[must_use]
    pub const fn no_data_state(mut self, state: NoDataState) -> Self {
        self.rule.no_data_state = state;
        self
    }

    /// Sets the execution-error policy.
    #[must_use]
    pub const fn exec_err_state(mut self, state: ExecErrState) -> Self {
        self.rule.exec_err_state = state;
        self
    }

    /// Adds a label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.rule.labels.insert(key, value);
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.rule.annotations.insert(key, value);
        self
    }

    /// Builds the rule, validating it with default limits.
    ///
    /// # Errors
    ///
    /// Returns `AlertingError::Config` if the rule is invalid.
    pub fn build(self) -> Result<AlertRule> {
        self.build_with(&RuleLimits::default())
    }

    /// Builds the rule, validating it with the given limits.
    ///
    /// # Errors
    ///
    /// Returns `AlertingError::Config` if the rule is invalid.
    pub fn build_with(self, limits: &RuleLimits) -> Result<AlertRule> {
        self.rule.validate(limits)?;
        Ok(self.rule)
    }
}
