//! Dry-run evaluation of a rule definition.

use std::sync::Arc;

use alerting_core::EvaluationResult;
use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;
use tracing::debug;

use crate::backend::LOCAL_RECIPIENT;
use crate::error::{ApiError, ApiResult};
use crate::extract::RequestContext;
use crate::ruler::rule_from_node;
use crate::state::ApiState;
use crate::types::RuleNode;

/// Rule group assigned to rules under test.
const TEST_GROUP: &str = "test";

/// Response of a rule test.
#[derive(Debug, Clone, Serialize)]
pub struct RuleTestResponse {
    /// One result per evaluated label set.
    pub results: Vec<EvaluationResult>,
}

/// Evaluates a rule definition once without storing or scheduling it.
///
/// # Errors
///
/// Returns `BadRequest` for recipients other than the local engine, and
/// configuration or evaluation errors from the rule itself.
pub async fn test_rule(
    state: &ApiState,
    org_id: i64,
    recipient: &str,
    node: &RuleNode,
) -> ApiResult<RuleTestResponse> {
    if recipient != LOCAL_RECIPIENT {
        return Err(ApiError::BadRequest(format!(
            "rule testing is only supported for the {LOCAL_RECIPIENT} recipient"
        )));
    }
    let config = state.config();
    let rule = rule_from_node(org_id, "", TEST_GROUP, config.default_group_interval, node)?;
    rule.validate(&config.limits)?;

    let scheduler = state.scheduler();
    let results = scheduler.evaluator().evaluate(&rule, scheduler.clock().now()).await?;
    debug!(org_id, rule_uid = %rule.uid, results = results.len(), "rule tested");
    Ok(RuleTestResponse { results })
}

/// Handle POST `/api/v1/rule/test/{recipient}`.
pub async fn test_rule_handler(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
    Json(node): Json<RuleNode>,
) -> ApiResult<Json<RuleTestResponse>> {
    test_rule(&state, ctx.org_id, &recipient, &node).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::types::GrafanaAlertRule;
    use alerting_core::{
        AlertQuery, AlertingError, ComparisonOperator, Condition, EvalOutcome, Evaluator, Labels,
        MemoryDatasourceCache, MemoryInstanceStore, MemoryRuleStore, NoopNotifier, RuleStore,
        Scheduler, SchedulerConfig, Series, StateManager, StaticQueryExecutor,
    };
    use alerting_notify::{NotificationRouter, RouterConfig};
    use chrono::Utc;

    fn state(executor: Arc<StaticQueryExecutor>) -> ApiState {
        let store = Arc::new(MemoryRuleStore::new());
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Evaluator::new(executor),
            Arc::new(StateManager::new(Arc::new(MemoryInstanceStore::new()))),
            Arc::new(NoopNotifier),
            store.clone(),
        );
        ApiState::new(
            ServerConfig::default(),
            scheduler,
            Arc::new(NotificationRouter::new(RouterConfig::default())),
            store,
            Arc::new(MemoryDatasourceCache::new()),
        )
        .expect("state")
    }

    fn node(threshold: f64) -> RuleNode {
        RuleNode {
            grafana_alert: Some(GrafanaAlertRule {
                uid: String::new(),
                title: "CPU".to_string(),
                condition: Condition::new("A", ComparisonOperator::GreaterThan, threshold),
                data: vec![AlertQuery::new("A", "prom", serde_json::json!({"expr": "cpu"}))],
                no_data_state: Default::default(),
                exec_err_state: Default::default(),
                version: 0,
            }),
            ..RuleNode::default()
        }
    }

    #[tokio::test]
    async fn evaluates_without_storing() {
        let executor = Arc::new(StaticQueryExecutor::new());
        executor.set_series(
            "A",
            vec![Series::from_values(Labels::new().with("host", "a"), Utc::now(), &[95.0])],
        );
        let state = state(executor);

        let response = test_rule(&state, 1, LOCAL_RECIPIENT, &node(80.0)).await.expect("test");

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].outcome, EvalOutcome::Firing);
        assert!(state.scheduler().scheduled_rules().is_empty());
        assert_eq!(state.rules().count_rules(1).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn remote_recipient_is_rejected() {
        let state = state(Arc::new(StaticQueryExecutor::new()));
        let err = test_rule(&state, 1, "prom", &node(80.0)).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn invalid_rule_is_rejected() {
        let state = state(Arc::new(StaticQueryExecutor::new()));
        let mut bad = node(80.0);
        if let Some(def) = bad.grafana_alert.as_mut() {
            def.title.clear();
        }
        let err = test_rule(&state, 1, LOCAL_RECIPIENT, &bad).await.unwrap_err();
        assert!(matches!(err, ApiError::Alerting(AlertingError::Config { .. })));
    }
}
