//! Rule evaluation.
//!
//! The [`Evaluator`] runs a rule's queries through a [`QueryExecutor`],
//! reduces every series of the condition query and compares the result
//! against the threshold. It is stateless; lifecycle is the job of the
//! state manager.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AlertingError, Result};
use crate::labels::Labels;
use crate::rule::{AlertQuery, AlertRule};

/// One sample of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Sample value. NaN marks a missing value.
    pub value: f64,
}

/// A labelled series returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Series labels.
    #[serde(default)]
    pub labels: Labels,
    /// Samples in time order.
    #[serde(default)]
    pub points: Vec<Sample>,
}

impl Series {
    /// Creates a series with one sample per value, all stamped `at`.
    pub fn from_values(labels: Labels, at: DateTime<Utc>, values: &[f64]) -> Self {
        Self {
            labels,
            points: values
                .iter()
                .map(|&value| Sample {
                    timestamp: at,
                    value,
                })
                .collect(),
        }
    }
}

/// Result of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Returned series.
    #[serde(default)]
    pub series: Vec<Series>,
    /// Query-level error reported by the datasource.
    #[serde(default)]
    pub error: Option<String>,
}

/// Results keyed by query ref id.
pub type QueryResponse = HashMap<String, QueryResult>;

/// Executes time-series queries on behalf of the evaluator.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Runs all queries of a rule as of `now`.
    async fn run_queries(
        &self,
        org_id: i64,
        queries: &[AlertQuery],
        now: DateTime<Utc>,
    ) -> Result<QueryResponse>;
}

/// Outcome of evaluating one label set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "lowercase")]
pub enum EvalOutcome {
    /// Condition is not met.
    Normal,
    /// Condition is met.
    Firing,
    /// The query returned nothing to evaluate.
    NoData,
    /// Evaluation failed.
    Error(String),
}

/// Result of evaluating a rule for one label set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Rule that produced the result.
    pub rule_uid: String,
    /// Series labels; empty for rule-wide results.
    pub labels: Labels,
    /// Evaluation time.
    pub evaluated_at: DateTime<Utc>,
    /// Reduced values keyed by ref id.
    pub values: BTreeMap<String, f64>,
    /// What the evaluation concluded.
    pub outcome: EvalOutcome,
    /// Time spent evaluating the rule.
    pub evaluation_duration: Duration,
}

impl EvaluationResult {
    /// A rule-wide error result, used when evaluation could not produce per-series results.
    pub fn error(rule: &AlertRule, at: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            rule_uid: rule.uid.clone(),
            labels: Labels::new(),
            evaluated_at: at,
            values: BTreeMap::new(),
            outcome: EvalOutcome::Error(message.into()),
            evaluation_duration: Duration::ZERO,
        }
    }

    /// A rule-wide no-data result.
    pub fn no_data(rule: &AlertRule, at: DateTime<Utc>) -> Self {
        Self {
            outcome: EvalOutcome::NoData,
            ..Self::error(rule, at, String::new())
        }
    }

    /// Returns true if the condition fired.
    #[must_use]
    pub fn firing(&self) -> bool {
        self.outcome == EvalOutcome::Firing
    }

    /// The error message, if the evaluation failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            EvalOutcome::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Evaluates rules against a query executor.
#[derive(Clone)]
pub struct Evaluator {
    executor: Arc<dyn QueryExecutor>,
    timeout: Duration,
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Evaluator {
    /// Default deadline for one evaluation.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates an evaluator with the default timeout.
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the evaluation deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Evaluates a rule as of `now`.
    ///
    /// Returns one result per label set of the condition query. A query with
    /// no series yields a single `NoData` result with an empty label set.
    ///
    /// # Errors
    ///
    /// Returns `AlertingError::Timeout` if the queries exceed the deadline and
    /// `AlertingError::Evaluation` if they fail or return conflicting series.
    pub async fn evaluate(
        &self,
        rule: &AlertRule,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationResult>> {
        let started = tokio::time::Instant::now();
        let response = tokio::time::timeout(
            self.timeout,
            self.executor.run_queries(rule.org_id, &rule.queries, now),
        )
        .await
        .map_err(|_| AlertingError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        })??;

        let mut results = reduce_condition(rule, &response, now)?;
        let elapsed = started.elapsed();
        for result in &mut results {
            result.evaluation_duration = elapsed;
        }

        debug!(
            rule_uid = %rule.uid,
            org_id = rule.org_id,
            results = results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "rule evaluated"
        );
        Ok(results)
    }
}

fn reduce_condition(
    rule: &AlertRule,
    response: &QueryResponse,
    now: DateTime<Utc>,
) -> Result<Vec<EvaluationResult>> {
    let condition = &rule.condition;
    let Some(result) = response.get(&condition.ref_id) else {
        return Ok(vec![EvaluationResult::no_data(rule, now)]);
    };
    if let Some(error) = &result.error {
        return Err(AlertingError::evaluation(format!(
            "query {} failed: {error}",
            condition.ref_id
        )));
    }
    if result.series.is_empty() {
        return Ok(vec![EvaluationResult::no_data(rule, now)]);
    }

    let mut seen = HashSet::new();
    let mut results = Vec::with_capacity(result.series.len());
    for series in &result.series {
        if !seen.insert(series.labels.fingerprint()) {
            return Err(AlertingError::evaluation(format!(
                "query {} returned duplicate series {}",
                condition.ref_id, series.labels
            )));
        }

        let samples: Vec<f64> = series
            .points
            .iter()
            .map(|p| p.value)
            .filter(|v| !v.is_nan())
            .collect();

        let mut values = BTreeMap::new();
        let outcome = match condition.reducer.reduce(&samples) {
            Some(value) if !value.is_nan() => {
                values.insert(condition.ref_id.clone(), value);
                if condition.operator.evaluate(value, condition.threshold) {
                    EvalOutcome::Firing
                } else {
                    EvalOutcome::Normal
                }
            }
            _ => EvalOutcome::NoData,
        };

        results.push(EvaluationResult {
            rule_uid: rule.uid.clone(),
            labels: series.labels.clone(),
            evaluated_at: now,
            values,
            outcome,
            evaluation_duration: Duration::ZERO,
        });
    }
    Ok(results)
}

/// Query executor returning canned responses. Useful in tests and for the
/// rule testing endpoint when no query service is configured.
#[derive(Debug, Default)]
pub struct StaticQueryExecutor {
    responses: parking_lot::RwLock<HashMap<String, QueryResult>>,
}

impl StaticQueryExecutor {
    /// Creates an executor with no responses; every query returns no series.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the result returned for a ref id.
    pub fn set(&self, ref_id: impl Into<String>, result: QueryResult) {
        self.responses.write().insert(ref_id.into(), result);
    }

    /// Sets a ref id to return the given series.
    pub fn set_series(&self, ref_id: impl Into<String>, series: Vec<Series>) {
        self.set(
            ref_id,
            QueryResult {
                series,
                error: None,
            },
        );
    }
}

#[async_trait]
impl QueryExecutor for StaticQueryExecutor {
    async fn run_queries(
        &self,
        _org_id: i64,
        queries: &[AlertQuery],
        _now: DateTime<Utc>,
    ) -> Result<QueryResponse> {
        let responses = self.responses.read();
        Ok(queries
            .iter()
            .map(|q| {
                let result = responses.get(&q.ref_id).cloned().unwrap_or_default();
                (q.ref_id.clone(), result)
            })
            .collect())
    }
}
