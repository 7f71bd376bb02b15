//! Ruler API family: rule groups by namespace.
//!
//! Locally, a posted group replaces the stored group as a whole. Every rule
//! is validated before anything is written, new rules are checked against
//! the organisation's quota, and the scheduler is told about every change
//! once the store accepted it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use alerting_core::{
    AlertRule, AlertingError, Datasource, DatasourceType, QuotaResource,
};
use async_trait::async_trait;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use tracing::info;
use uuid::Uuid;

use crate::backend::{Backend, Family, Forked, forked};
use crate::error::ApiResult;
use crate::extract::RequestContext;
use crate::proxy::{ProxyBody, ProxyClient, ProxyRequest};
use crate::state::ApiState;
use crate::types::{
    ApiMessage, GrafanaAlertRule, NamespaceConfig, RuleGroupConfig, RuleNode, format_duration,
    parse_duration,
};

/// Operations of the ruler API family.
#[async_trait]
pub trait RulerApi: Send + Sync {
    /// All rule groups, by namespace.
    async fn get_rules(&self) -> ApiResult<NamespaceConfig>;

    /// Rule groups of one namespace.
    async fn get_namespace(&self, namespace: &str) -> ApiResult<NamespaceConfig>;

    /// One rule group.
    async fn get_group(&self, namespace: &str, group: &str) -> ApiResult<RuleGroupConfig>;

    /// Creates or replaces a rule group.
    async fn post_group(&self, namespace: &str, group: RuleGroupConfig) -> ApiResult<()>;

    /// Deletes every group of a namespace.
    async fn delete_namespace(&self, namespace: &str) -> ApiResult<()>;

    /// Deletes one rule group.
    async fn delete_group(&self, namespace: &str, group: &str) -> ApiResult<()>;
}

/// Converts a locally managed rule node into a rule.
///
/// # Errors
///
/// Returns `AlertingError::Config` for nodes without a `grafana_alert`
/// definition or with an unparsable `for`.
pub fn rule_from_node(
    org_id: i64,
    namespace: &str,
    group: &str,
    interval: Duration,
    node: &RuleNode,
) -> ApiResult<AlertRule> {
    let Some(def) = &node.grafana_alert else {
        return Err(AlertingError::config(
            "only rules with a grafana_alert definition can be stored locally",
        )
        .into());
    };
    let for_seconds = match node.for_duration.as_deref() {
        None => 0,
        Some(text) => parse_duration(text)
            .ok_or_else(|| AlertingError::config(format!("invalid for duration {text:?}")))?
            .as_secs(),
    };
    let uid = if def.uid.trim().is_empty() {
        Uuid::new_v4().to_string()
    } else {
        def.uid.clone()
    };

    Ok(AlertRule {
        org_id,
        uid,
        title: def.title.clone(),
        namespace_uid: namespace.to_string(),
        rule_group: group.to_string(),
        queries: def.data.clone(),
        condition: def.condition.clone(),
        interval_seconds: interval.as_secs(),
        for_seconds,
        no_data_state: def.no_data_state,
        exec_err_state: def.exec_err_state,
        labels: node.labels.clone(),
        annotations: node.annotations.clone(),
        version: def.version,
        updated: None,
    })
}

/// Renders a stored rule as a rule node.
#[must_use]
pub fn node_from_rule(rule: &AlertRule) -> RuleNode {
    RuleNode {
        for_duration: (rule.for_seconds > 0).then(|| format_duration(rule.for_duration())),
        labels: rule.labels.clone(),
        annotations: rule.annotations.clone(),
        grafana_alert: Some(GrafanaAlertRule {
            uid: rule.uid.clone(),
            title: rule.title.clone(),
            condition: rule.condition.clone(),
            data: rule.queries.clone(),
            no_data_state: rule.no_data_state,
            exec_err_state: rule.exec_err_state,
            version: rule.version,
        }),
        ..RuleNode::default()
    }
}

fn group_config(name: String, rules: &[AlertRule]) -> RuleGroupConfig {
    RuleGroupConfig {
        interval: rules.first().map(|r| format_duration(r.interval())),
        rules: rules.iter().map(node_from_rule).collect(),
        name,
    }
}

fn namespace_config(rules: Vec<AlertRule>) -> NamespaceConfig {
    let mut grouped: BTreeMap<String, BTreeMap<String, Vec<AlertRule>>> = BTreeMap::new();
    for rule in rules {
        grouped
            .entry(rule.namespace_uid.clone())
            .or_default()
            .entry(rule.rule_group.clone())
            .or_default()
            .push(rule);
    }
    grouped
        .into_iter()
        .map(|(namespace, groups)| {
            let groups = groups
                .into_iter()
                .map(|(name, mut rules)| {
                    rules.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.uid.cmp(&b.uid)));
                    group_config(name, &rules)
                })
                .collect();
            (namespace, groups)
        })
        .collect()
}

/// The local rule store of one organisation.
#[derive(Debug, Clone)]
pub struct LocalRulerApi {
    state: Arc<ApiState>,
    org_id: i64,
}

impl LocalRulerApi {
    /// Creates the local implementation for an organisation.
    #[must_use]
    pub const fn new(state: Arc<ApiState>, org_id: i64) -> Self {
        Self { state, org_id }
    }

    async fn rules_in(&self, namespace: &str, group: Option<&str>) -> ApiResult<Vec<AlertRule>> {
        Ok(self
            .state
            .rules()
            .list_rules(Some(self.org_id))
            .await?
            .into_iter()
            .filter(|r| r.namespace_uid == namespace && group.is_none_or(|g| r.rule_group == g))
            .collect())
    }

    async fn delete_rules(&self, rules: Vec<AlertRule>) -> ApiResult<usize> {
        let mut deleted = 0;
        for rule in rules {
            let key = rule.key();
            if self.state.rules().delete_rule(&key).await? {
                deleted += 1;
            }
            self.state.scheduler().remove_rule(&key);
        }
        Ok(deleted)
    }
}

#[async_trait]
impl RulerApi for LocalRulerApi {
    async fn get_rules(&self) -> ApiResult<NamespaceConfig> {
        Ok(namespace_config(
            self.state.rules().list_rules(Some(self.org_id)).await?,
        ))
    }

    async fn get_namespace(&self, namespace: &str) -> ApiResult<NamespaceConfig> {
        Ok(namespace_config(self.rules_in(namespace, None).await?))
    }

    async fn get_group(&self, namespace: &str, group: &str) -> ApiResult<RuleGroupConfig> {
        let rules = self.rules_in(namespace, Some(group)).await?;
        namespace_config(rules)
            .remove(namespace)
            .and_then(|groups| groups.into_iter().next())
            .ok_or_else(|| AlertingError::not_found("rule group", format!("{namespace}/{group}")).into())
    }

    async fn post_group(&self, namespace: &str, group: RuleGroupConfig) -> ApiResult<()> {
        if group.name.trim().is_empty() {
            return Err(AlertingError::config("rule group name cannot be empty").into());
        }
        let config = self.state.config();
        let interval = match group.interval.as_deref() {
            None => config.default_group_interval,
            Some(text) => parse_duration(text)
                .ok_or_else(|| AlertingError::config(format!("invalid group interval {text:?}")))?,
        };

        let mut submitted = Vec::with_capacity(group.rules.len());
        let mut uids = HashSet::new();
        for node in &group.rules {
            let rule = rule_from_node(self.org_id, namespace, &group.name, interval, node)?;
            rule.validate(&config.limits)?;
            if !uids.insert(rule.uid.clone()) {
                return Err(AlertingError::config(format!("duplicate rule uid {:?}", rule.uid)).into());
            }
            submitted.push(rule);
        }

        let store = self.state.rules();
        let mut writes = Vec::with_capacity(submitted.len());
        let mut creates = false;
        for mut rule in submitted {
            match store.get_rule(&rule.key()).await? {
                Some(stored) => {
                    // Unversioned updates apply on top of whatever is stored.
                    if rule.version == 0 {
                        rule.version = stored.version;
                    }
                    if !rule.same_definition(&stored) || rule.version != stored.version {
                        writes.push(rule);
                    }
                }
                None => {
                    creates = true;
                    writes.push(rule);
                }
            }
        }
        if creates {
            self.state
                .quota()
                .check_quota(self.org_id, QuotaResource::AlertRule)
                .await?;
        }

        for rule in writes {
            let stored = store.upsert_rule(rule).await?;
            self.state.scheduler().add_or_update_rule(stored)?;
        }

        let stale: Vec<AlertRule> = self
            .rules_in(namespace, Some(&group.name))
            .await?
            .into_iter()
            .filter(|r| !uids.contains(&r.uid))
            .collect();
        let removed = self.delete_rules(stale).await?;

        info!(
            org_id = self.org_id,
            namespace = %namespace,
            group = %group.name,
            rules = uids.len(),
            removed,
            "rule group saved"
        );
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> ApiResult<()> {
        let rules = self.rules_in(namespace, None).await?;
        if rules.is_empty() {
            return Err(AlertingError::not_found("namespace", namespace).into());
        }
        let removed = self.delete_rules(rules).await?;
        info!(org_id = self.org_id, namespace = %namespace, removed, "namespace deleted");
        Ok(())
    }

    async fn delete_group(&self, namespace: &str, group: &str) -> ApiResult<()> {
        let rules = self.rules_in(namespace, Some(group)).await?;
        if rules.is_empty() {
            return Err(AlertingError::not_found("rule group", format!("{namespace}/{group}")).into());
        }
        let removed = self.delete_rules(rules).await?;
        info!(org_id = self.org_id, namespace = %namespace, group = %group, removed, "rule group deleted");
        Ok(())
    }
}

/// A remote ruler behind a datasource.
#[derive(Debug, Clone)]
pub struct ProxyRulerApi {
    client: ProxyClient,
    datasource: Datasource,
    headers: HeaderMap,
}

impl ProxyRulerApi {
    /// Creates the proxy implementation for a datasource.
    #[must_use]
    pub const fn new(client: ProxyClient, datasource: Datasource, headers: HeaderMap) -> Self {
        Self {
            client,
            datasource,
            headers,
        }
    }

    fn request(&self, method: Method, namespace: Option<&str>, group: Option<&str>) -> ProxyRequest {
        let base = match self.datasource.ds_type {
            DatasourceType::Loki => "/loki/api/v1/rules",
            _ => "/api/v1/rules",
        };
        [namespace, group]
            .into_iter()
            .flatten()
            .fold(ProxyRequest::new(method, base, self.headers.clone()), |request, segment| {
                request.segment(segment)
            })
    }
}

#[async_trait]
impl RulerApi for ProxyRulerApi {
    async fn get_rules(&self) -> ApiResult<NamespaceConfig> {
        let request = self.request(Method::GET, None, None);
        self.client.send_yaml(&self.datasource, request).await
    }

    async fn get_namespace(&self, namespace: &str) -> ApiResult<NamespaceConfig> {
        let request = self.request(Method::GET, Some(namespace), None);
        self.client.send_yaml(&self.datasource, request).await
    }

    async fn get_group(&self, namespace: &str, group: &str) -> ApiResult<RuleGroupConfig> {
        let request = self.request(Method::GET, Some(namespace), Some(group));
        self.client.send_yaml(&self.datasource, request).await
    }

    async fn post_group(&self, namespace: &str, group: RuleGroupConfig) -> ApiResult<()> {
        let request = self
            .request(Method::POST, Some(namespace), None)
            .with_body(ProxyBody::yaml(&group)?);
        self.client.send(&self.datasource, request).await?;
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> ApiResult<()> {
        let request = self.request(Method::DELETE, Some(namespace), None);
        self.client.send(&self.datasource, request).await?;
        Ok(())
    }

    async fn delete_group(&self, namespace: &str, group: &str) -> ApiResult<()> {
        let request = self.request(Method::DELETE, Some(namespace), Some(group));
        self.client.send(&self.datasource, request).await?;
        Ok(())
    }
}

/// The ruler implementation serving a request.
pub type ForkedRuler = Forked<LocalRulerApi, ProxyRulerApi>;

#[async_trait]
impl RulerApi for ForkedRuler {
    async fn get_rules(&self) -> ApiResult<NamespaceConfig> {
        forked!(self, api => api.get_rules().await)
    }

    async fn get_namespace(&self, namespace: &str) -> ApiResult<NamespaceConfig> {
        forked!(self, api => api.get_namespace(namespace).await)
    }

    async fn get_group(&self, namespace: &str, group: &str) -> ApiResult<RuleGroupConfig> {
        forked!(self, api => api.get_group(namespace, group).await)
    }

    async fn post_group(&self, namespace: &str, group: RuleGroupConfig) -> ApiResult<()> {
        forked!(self, api => api.post_group(namespace, group).await)
    }

    async fn delete_namespace(&self, namespace: &str) -> ApiResult<()> {
        forked!(self, api => api.delete_namespace(namespace).await)
    }

    async fn delete_group(&self, namespace: &str, group: &str) -> ApiResult<()> {
        forked!(self, api => api.delete_group(namespace, group).await)
    }
}

async fn ruler(state: &Arc<ApiState>, ctx: RequestContext, recipient: &str) -> ApiResult<ForkedRuler> {
    Ok(match state.resolve(ctx.org_id, recipient, Family::Ruler).await? {
        Backend::Local => Forked::Local(LocalRulerApi::new(Arc::clone(state), ctx.org_id)),
        Backend::Proxy(ds) => Forked::Proxy(ProxyRulerApi::new(
            state.proxy().clone(),
            ds,
            ctx.forward_headers,
        )),
    })
}

/// Handle GET `/api/ruler/{recipient}/api/v1/rules`.
pub async fn get_rules(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
) -> ApiResult<Json<NamespaceConfig>> {
    ruler(&state, ctx, &recipient).await?.get_rules().await.map(Json)
}

/// Handle GET `/api/ruler/{recipient}/api/v1/rules/{namespace}`.
pub async fn get_namespace(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path((recipient, namespace)): Path<(String, String)>,
) -> ApiResult<Json<NamespaceConfig>> {
    let api = ruler(&state, ctx, &recipient).await?;
    api.get_namespace(&namespace).await.map(Json)
}

/// Handle GET `/api/ruler/{recipient}/api/v1/rules/{namespace}/{group}`.
pub async fn get_group(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path((recipient, namespace, group)): Path<(String, String, String)>,
) -> ApiResult<Json<RuleGroupConfig>> {
    let api = ruler(&state, ctx, &recipient).await?;
    api.get_group(&namespace, &group).await.map(Json)
}

/// Handle POST `/api/ruler/{recipient}/api/v1/rules/{namespace}`.
pub async fn post_group(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path((recipient, namespace)): Path<(String, String)>,
    Json(group): Json<RuleGroupConfig>,
) -> ApiResult<Json<ApiMessage>> {
    let api = ruler(&state, ctx, &recipient).await?;
    api.post_group(&namespace, group).await?;
    Ok(Json(ApiMessage::new("rule group updated successfully")))
}

/// Handle DELETE `/api/ruler/{recipient}/api/v1/rules/{namespace}`.
pub async fn delete_namespace(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path((recipient, namespace)): Path<(String, String)>,
) -> ApiResult<Json<ApiMessage>> {
    let api = ruler(&state, ctx, &recipient).await?;
    api.delete_namespace(&namespace).await?;
    Ok(Json(ApiMessage::new("namespace deleted")))
}

/// Handle DELETE `/api/ruler/{recipient}/api/v1/rules/{namespace}/{group}`.
pub async fn delete_group(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path((recipient, namespace, group)): Path<(String, String, String)>,
) -> ApiResult<Json<ApiMessage>> {
    let api = ruler(&state, ctx, &recipient).await?;
    api.delete_group(&namespace, &group).await?;
    Ok(Json(ApiMessage::new("rule group deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::error::ApiError;
    use alerting_core::{
        AlertQuery, ComparisonOperator, Condition, Evaluator, MemoryDatasourceCache,
        MemoryInstanceStore, MemoryRuleStore, NoopNotifier, RuleCountQuota, RuleKey, RuleStore, Scheduler,
        SchedulerConfig, StateManager, StaticQueryExecutor,
    };
    use alerting_notify::{NotificationRouter, RouterConfig};

    fn node(uid: &str, title: &str) -> RuleNode {
        RuleNode {
            for_duration: Some("5m".to_string()),
            grafana_alert: Some(GrafanaAlertRule {
                uid: uid.to_string(),
                title: title.to_string(),
                condition: Condition::new("A", ComparisonOperator::GreaterThan, 80.0),
                data: vec![AlertQuery::new("A", "prom", serde_json::json!({"expr": "cpu"}))],
                no_data_state: Default::default(),
                exec_err_state: Default::default(),
                version: 0,
            }),
            ..RuleNode::default()
        }
    }

    fn group(name: &str, nodes: Vec<RuleNode>) -> RuleGroupConfig {
        RuleGroupConfig {
            name: name.to_string(),
            interval: Some("30s".to_string()),
            rules: nodes,
        }
    }

    fn state_with(store: Arc<MemoryRuleStore>, quota: Option<u64>) -> Arc<ApiState> {
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Evaluator::new(Arc::new(StaticQueryExecutor::new())),
            Arc::new(StateManager::new(Arc::new(MemoryInstanceStore::new()))),
            Arc::new(NoopNotifier),
            store.clone(),
        );
        let state = ApiState::new(
            ServerConfig::default(),
            scheduler,
            Arc::new(NotificationRouter::new(RouterConfig::default())),
            store.clone(),
            Arc::new(MemoryDatasourceCache::new()),
        )
        .expect("state");
        let state = match quota {
            Some(limit) => state.with_quota(Arc::new(RuleCountQuota::new(store, Some(limit)))),
            None => state,
        };
        Arc::new(state)
    }

    mod conversion {
        use super::*;

        #[test]
        fn node_to_rule() {
            let rule = rule_from_node(3, "ns", "g", Duration::from_secs(30), &node("r1", "CPU"))
                .expect("rule");
            assert_eq!(rule.org_id, 3);
            assert_eq!(rule.uid, "r1");
            assert_eq!(rule.namespace_uid, "ns");
            assert_eq!(rule.rule_group, "g");
            assert_eq!(rule.interval_seconds, 30);
            assert_eq!(rule.for_seconds, 300);
        }

        #[test]
        fn missing_uid_is_generated() {
            let rule = rule_from_node(1, "ns", "g", Duration::from_secs(60), &node("", "CPU"))
                .expect("rule");
            assert!(Uuid::parse_str(&rule.uid).is_ok());
        }

        #[test]
        fn remote_nodes_are_rejected() {
            let remote = RuleNode {
                alert: Some("HighCPU".to_string()),
                expr: Some("cpu > 80".to_string()),
                ..RuleNode::default()
            };
            let err = rule_from_node(1, "ns", "g", Duration::from_secs(60), &remote).unwrap_err();
            assert!(matches!(err, ApiError::Alerting(AlertingError::Config { .. })));
        }

        #[test]
        fn rule_to_node_and_back() {
            let rule = rule_from_node(1, "ns", "g", Duration::from_secs(60), &node("r1", "CPU"))
                .expect("rule");
            let back = node_from_rule(&rule);
            assert_eq!(back.for_duration.as_deref(), Some("5m"));
            assert_eq!(back, node("r1", "CPU"));
        }

    }

    mod local {
        use super::*;

        #[tokio::test]
        async fn post_schedules_rules() {
            let store = Arc::new(MemoryRuleStore::new());
            let state = state_with(store.clone(), None);
            let api = LocalRulerApi::new(Arc::clone(&state), 1);

            api.post_group("ns", group("g", vec![node("r1", "CPU"), node("r2", "Mem")]))
                .await
                .expect("post");

            assert_eq!(store.count_rules(1).await.expect("count"), 2);
            assert_eq!(state.scheduler().scheduled_rules().len(), 2);
            let fetched = api.get_group("ns", "g").await.expect("group");
            assert_eq!(fetched.interval.as_deref(), Some("30s"));
            assert_eq!(fetched.rules.len(), 2);
            state.scheduler().shutdown();
        }

        #[tokio::test]
        async fn repost_removes_missing_rules() {
            let store = Arc::new(MemoryRuleStore::new());
            let state = state_with(store.clone(), None);
            let api = LocalRulerApi::new(Arc::clone(&state), 1);

            api.post_group("ns", group("g", vec![node("r1", "CPU"), node("r2", "Mem")]))
                .await
                .expect("post");
            api.post_group("ns", group("g", vec![node("r1", "CPU")]))
                .await
                .expect("repost");

            assert_eq!(store.count_rules(1).await.expect("count"), 1);
            assert!(!state.scheduler().is_scheduled(&RuleKey::new(1, "r2")));
            state.scheduler().shutdown();
        }

        #[tokio::test]
        async fn unchanged_rules_keep_their_version() {
            let store = Arc::new(MemoryRuleStore::new());
            let state = state_with(store.clone(), None);
            let api = LocalRulerApi::new(Arc::clone(&state), 1);

            api.post_group("ns", group("g", vec![node("r1", "CPU")])).await.expect("post");
            api.post_group("ns", group("g", vec![node("r1", "CPU")])).await.expect("repost");

            let stored = store.get_rule(&RuleKey::new(1, "r1")).await.expect("get").expect("rule");
            assert_eq!(stored.version, 1);
            state.scheduler().shutdown();
        }

        #[tokio::test]
        async fn invalid_rule_writes_nothing() {
            let store = Arc::new(MemoryRuleStore::new());
            let state = state_with(store.clone(), None);
            let api = LocalRulerApi::new(Arc::clone(&state), 1);

            let mut bad = node("r2", "Bad");
            if let Some(def) = bad.grafana_alert.as_mut() {
                def.data.clear();
            }
            let err = api
                .post_group("ns", group("g", vec![node("r1", "CPU"), bad]))
                .await
                .unwrap_err();

            assert!(matches!(err, ApiError::Alerting(AlertingError::Config { .. })));
            assert_eq!(store.count_rules(1).await.expect("count"), 0);
            assert!(state.scheduler().scheduled_rules().is_empty());
        }

        #[tokio::test]
        async fn quota_rejects_new_rules() {
            let store = Arc::new(MemoryRuleStore::new());
            let state = state_with(store.clone(), Some(1));
            let api = LocalRulerApi::new(Arc::clone(&state), 1);

            api.post_group("ns", group("g", vec![node("r1", "CPU")])).await.expect("post");
            let err = api
                .post_group("ns", group("h", vec![node("r2", "Mem")]))
                .await
                .unwrap_err();

            assert!(matches!(err, ApiError::Alerting(AlertingError::Capacity { .. })));
            assert!(!state.scheduler().is_scheduled(&RuleKey::new(1, "r2")));
            state.scheduler().shutdown();
        }

        #[tokio::test]
        async fn delete_group_and_namespace() {
            let store = Arc::new(MemoryRuleStore::new());
            let state = state_with(store.clone(), None);
            let api = LocalRulerApi::new(Arc::clone(&state), 1);

            api.post_group("ns", group("g", vec![node("r1", "CPU")])).await.expect("post");
            api.post_group("ns", group("h", vec![node("r2", "Mem")])).await.expect("post");

            api.delete_group("ns", "g").await.expect("delete group");
            assert!(!state.scheduler().is_scheduled(&RuleKey::new(1, "r1")));
            assert!(api.delete_group("ns", "g").await.is_err());

            api.delete_namespace("ns").await.expect("delete namespace");
            assert_eq!(store.count_rules(1).await.expect("count"), 0);
            assert!(api.get_rules().await.expect("rules").is_empty());
            state.scheduler().shutdown();
        }

        #[tokio::test]
        async fn bad_interval_is_rejected() {
            let state = state_with(Arc::new(MemoryRuleStore::new()), None);
            let api = LocalRulerApi::new(state, 1);
            let mut g = group("g", vec![node("r1", "CPU")]);
            g.interval = Some("soon".to_string());
            assert!(api.post_group("ns", g).await.is_err());
        }
    }

    #[test]
    fn proxy_paths_per_backend() {
        let client = ProxyClient::with_client(reqwest::Client::new(), Duration::from_secs(1));
        let prom = ProxyRulerApi::new(
            client.clone(),
            Datasource::new("p", DatasourceType::Prometheus, "http://p"),
            HeaderMap::new(),
        );
        let loki = ProxyRulerApi::new(
            client,
            Datasource::new("l", DatasourceType::Loki, "http://l"),
            HeaderMap::new(),
        );
        let path = |api: &ProxyRulerApi, ns: Option<&str>, group: Option<&str>| {
            api.request(Method::GET, ns, group)
                .url(&api.datasource)
                .expect("url")
                .path()
                .to_string()
        };
        assert_eq!(path(&prom, None, None), "/api/v1/rules");
        assert_eq!(path(&prom, Some("ns"), Some("g 1")), "/api/v1/rules/ns/g%201");
        assert_eq!(path(&prom, Some("team/a"), None), "/api/v1/rules/team%2Fa");
        assert_eq!(path(&loki, Some("ns"), None), "/loki/api/v1/rules/ns");
    }
}
