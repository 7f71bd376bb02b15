//! Prometheus API family: rule and alert listings.

use std::collections::BTreeMap;
use std::sync::Arc;

use alerting_core::{AlertInstance, AlertRule, Datasource, DatasourceType, InstanceState, RuleStore, Scheduler};
use async_trait::async_trait;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};

use crate::backend::{Backend, Family, Forked, forked};
use crate::error::{ApiError, ApiResult};
use crate::extract::RequestContext;
use crate::proxy::{ProxyClient, ProxyRequest};
use crate::state::ApiState;
use crate::types::{AlertDiscovery, AlertingRule, PromAlert, PromResponse, RuleDiscovery, RuleGroup};

/// Operations of the Prometheus API family.
#[async_trait]
pub trait PrometheusApi: Send + Sync {
    /// Lists rule groups with their rules' state and health.
    async fn list_rules(&self) -> ApiResult<RuleDiscovery>;

    /// Lists active alerts.
    async fn list_alerts(&self) -> ApiResult<AlertDiscovery>;
}

/// Listings built from the local rule store and state manager.
pub struct LocalPrometheusApi {
    scheduler: Scheduler,
    rules: Arc<dyn RuleStore>,
    org_id: i64,
}

impl LocalPrometheusApi {
    /// Creates the local implementation for an organisation.
    #[must_use]
    pub fn new(scheduler: Scheduler, rules: Arc<dyn RuleStore>, org_id: i64) -> Self {
        Self {
            scheduler,
            rules,
            org_id,
        }
    }

    fn alerting_rule(&self, rule: &AlertRule) -> AlertingRule {
        let instances = self.scheduler.state().get_instances(self.org_id, &rule.uid);
        let health = self.scheduler.rule_health(&rule.key()).unwrap_or_default();
        AlertingRule {
            state: rule_state(&instances).to_string(),
            name: rule.title.clone(),
            query: rule.condition.to_string(),
            duration: rule.for_duration().as_secs_f64(),
            labels: rule.labels.clone(),
            annotations: rule.annotations.clone(),
            alerts: instances
                .iter()
                .filter(|i| i.current_state.is_active())
                .map(prom_alert)
                .collect(),
            health: health.health.as_str().to_string(),
            last_error: health.last_error,
            rule_type: "alerting".to_string(),
            last_evaluation: health.last_evaluation,
            evaluation_time: health.last_duration.as_secs_f64(),
        }
    }
}

/// `firing` beats `pending` beats `inactive`.
fn rule_state(instances: &[AlertInstance]) -> &'static str {
    if instances.iter().any(|i| i.current_state == InstanceState::Alerting) {
        "firing"
    } else if instances.iter().any(|i| i.current_state == InstanceState::Pending) {
        "pending"
    } else {
        "inactive"
    }
}

fn prom_alert(instance: &AlertInstance) -> PromAlert {
    PromAlert {
        labels: instance.labels.clone(),
        annotations: instance.annotations.clone(),
        state: instance.current_state.as_str().to_string(),
        active_at: Some(instance.state_since),
        value: instance
            .last_values
            .values()
            .next()
            .map(ToString::to_string)
            .unwrap_or_default(),
    }
}

#[async_trait]
impl PrometheusApi for LocalPrometheusApi {
    async fn list_rules(&self) -> ApiResult<RuleDiscovery> {
        let mut grouped: BTreeMap<(String, String), Vec<AlertRule>> = BTreeMap::new();
        for rule in self.rules.list_rules(Some(self.org_id)).await? {
            grouped
                .entry((rule.namespace_uid.clone(), rule.rule_group.clone()))
                .or_default()
                .push(rule);
        }

        let groups = grouped
            .into_iter()
            .map(|((file, name), mut rules)| {
                rules.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.uid.cmp(&b.uid)));
                let interval = rules
                    .first()
                    .map_or(0.0, |r| r.interval().as_secs_f64());
                let rules: Vec<AlertingRule> = rules.iter().map(|r| self.alerting_rule(r)).collect();
                RuleGroup {
                    name,
                    file,
                    interval,
                    last_evaluation: rules.iter().filter_map(|r| r.last_evaluation).max(),
                    evaluation_time: rules.iter().map(|r| r.evaluation_time).sum(),
                    rules,
                }
            })
            .collect();
        Ok(RuleDiscovery { groups })
    }

    async fn list_alerts(&self) -> ApiResult<AlertDiscovery> {
        let mut instances: Vec<AlertInstance> = self
            .scheduler
            .state()
            .list_instances(self.org_id)
            .into_iter()
            .filter(|i| i.current_state.is_active())
            .collect();
        instances.sort_by(|a, b| {
            a.rule_uid
                .cmp(&b.rule_uid)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(AlertDiscovery {
            alerts: instances.iter().map(prom_alert).collect(),
        })
    }
}

/// A remote Prometheus-compatible backend behind a datasource.
#[derive(Debug, Clone)]
pub struct ProxyPrometheusApi {
    client: ProxyClient,
    datasource: Datasource,
    headers: HeaderMap,
}

impl ProxyPrometheusApi {
    /// Creates the proxy implementation for a datasource.
    #[must_use]
    pub const fn new(client: ProxyClient, datasource: Datasource, headers: HeaderMap) -> Self {
        Self {
            client,
            datasource,
            headers,
        }
    }

    /// Loki serves the Prometheus API under `/prometheus`.
    fn path(&self, suffix: &str) -> String {
        match self.datasource.ds_type {
            DatasourceType::Loki => format!("/prometheus{suffix}"),
            _ => suffix.to_string(),
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, suffix: &str) -> ApiResult<T> {
        let request = ProxyRequest::new(Method::GET, &self.path(suffix), self.headers.clone());
        let response: PromResponse<T> = self.client.send_json(&self.datasource, request).await?;
        if response.status != "success" {
            return Err(ApiError::InvalidUpstreamResponse(
                response.error.unwrap_or_else(|| format!("status {}", response.status)),
            ));
        }
        response
            .data
            .ok_or_else(|| ApiError::InvalidUpstreamResponse("missing data".to_string()))
    }
}

#[async_trait]
impl PrometheusApi for ProxyPrometheusApi {
    async fn list_rules(&self) -> ApiResult<RuleDiscovery> {
        self.get("/api/v1/rules").await
    }

    async fn list_alerts(&self) -> ApiResult<AlertDiscovery> {
        self.get("/api/v1/alerts").await
    }
}

/// The Prometheus implementation serving a request.
pub type ForkedPrometheus = Forked<LocalPrometheusApi, ProxyPrometheusApi>;

#[async_trait]
impl PrometheusApi for ForkedPrometheus {
    async fn list_rules(&self) -> ApiResult<RuleDiscovery> {
        forked!(self, api => api.list_rules().await)
    }

    async fn list_alerts(&self) -> ApiResult<AlertDiscovery> {
        forked!(self, api => api.list_alerts().await)
    }
}

async fn prometheus(
    state: &ApiState,
    ctx: RequestContext,
    recipient: &str,
) -> ApiResult<ForkedPrometheus> {
    Ok(
        match state.resolve(ctx.org_id, recipient, Family::Prometheus).await? {
            Backend::Local => Forked::Local(LocalPrometheusApi::new(
                state.scheduler().clone(),
                Arc::clone(state.rules()),
                ctx.org_id,
            )),
            Backend::Proxy(ds) => Forked::Proxy(ProxyPrometheusApi::new(
                state.proxy().clone(),
                ds,
                ctx.forward_headers,
            )),
        },
    )
}

/// Handle GET `/api/prometheus/{recipient}/api/v1/rules`.
pub async fn list_rules(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
) -> ApiResult<Json<PromResponse<RuleDiscovery>>> {
    let api = prometheus(&state, ctx, &recipient).await?;
    Ok(Json(PromResponse::success(api.list_rules().await?)))
}

/// Handle GET `/api/prometheus/{recipient}/api/v1/alerts`.
pub async fn list_alerts(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
) -> ApiResult<Json<PromResponse<AlertDiscovery>>> {
    let api = prometheus(&state, ctx, &recipient).await?;
    Ok(Json(PromResponse::success(api.list_alerts().await?)))
}
