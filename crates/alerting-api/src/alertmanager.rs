//! Alertmanager API family: alerts, alert groups, silences and configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use alerting_core::Datasource;
use alerting_notify::{
    AlertFilter, AlertGroup, AlertmanagerConfig, GettableAlert, GettableSilence, Matchers,
    NotificationRouter, PostSilenceResponse, PostableSilence, UserConfig,
};
use async_trait::async_trait;
use chrono::Utc;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum_extra::extract::Query;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::{Backend, Family, Forked, forked};
use crate::error::{ApiError, ApiResult};
use crate::extract::RequestContext;
use crate::proxy::{ProxyBody, ProxyClient, ProxyRequest};
use crate::state::ApiState;
use crate::types::ApiMessage;

/// Query parameters of the alert listing endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertParams {
    /// Include active alerts.
    pub active: Option<bool>,
    /// Include silenced alerts.
    pub silenced: Option<bool>,
    /// Include inhibited alerts.
    pub inhibited: Option<bool>,
    /// Include unprocessed alerts.
    pub unprocessed: Option<bool>,
    /// Label matchers, e.g. `severity="critical"`.
    #[serde(default)]
    pub filter: Vec<String>,
    /// Receiver name pattern.
    pub receiver: Option<String>,
}

impl AlertParams {
    /// Builds the local alert filter.
    ///
    /// # Errors
    ///
    /// Returns an error if a matcher or the receiver pattern is invalid.
    pub fn to_filter(&self) -> ApiResult<AlertFilter> {
        let mut filter = AlertFilter {
            active: self.active.unwrap_or(true),
            silenced: self.silenced.unwrap_or(true),
            inhibited: self.inhibited.unwrap_or(true),
            unprocessed: self.unprocessed.unwrap_or(true),
            ..AlertFilter::default()
        }
        .with_matchers(Matchers::parse_all(&self.filter)?);
        if let Some(receiver) = &self.receiver {
            filter = filter.with_receiver(receiver)?;
        }
        Ok(filter)
    }

    /// Query string pairs for a proxied request.
    #[must_use]
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        for (name, value) in [
            ("active", self.active),
            ("silenced", self.silenced),
            ("inhibited", self.inhibited),
            ("unprocessed", self.unprocessed),
        ] {
            if let Some(value) = value {
                query.push((name.to_string(), value.to_string()));
            }
        }
        for matcher in &self.filter {
            query.push(("filter".to_string(), matcher.clone()));
        }
        if let Some(receiver) = &self.receiver {
            query.push(("receiver".to_string(), receiver.clone()));
        }
        query
    }
}

/// Query parameters of the silence listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SilenceParams {
    /// Label matchers the silence's matchers must satisfy.
    #[serde(default)]
    pub filter: Vec<String>,
}

/// Operations of the Alertmanager API family.
#[async_trait]
pub trait AlertmanagerApi: Send + Sync {
    /// Lists alerts.
    async fn get_alerts(&self, params: &AlertParams) -> ApiResult<Vec<GettableAlert>>;

    /// Lists alert groups.
    async fn get_alert_groups(&self, params: &AlertParams) -> ApiResult<Vec<AlertGroup>>;

    /// Lists silences.
    async fn list_silences(&self, filter: &[String]) -> ApiResult<Vec<GettableSilence>>;

    /// Fetches one silence.
    async fn get_silence(&self, id: &str) -> ApiResult<GettableSilence>;

    /// Creates or updates a silence.
    async fn create_silence(&self, silence: PostableSilence) -> ApiResult<PostSilenceResponse>;

    /// Expires a silence.
    async fn delete_silence(&self, id: &str) -> ApiResult<()>;

    /// Fetches the configuration.
    async fn get_config(&self) -> ApiResult<UserConfig>;

    /// Validates and applies a configuration.
    async fn post_config(&self, config: UserConfig) -> ApiResult<()>;
}

/// The local Alertmanager of one organisation.
#[derive(Clone)]
pub struct LocalAlertmanagerApi {
    router: Arc<NotificationRouter>,
    org_id: i64,
}

impl LocalAlertmanagerApi {
    /// Creates the local implementation for an organisation.
    #[must_use]
    pub const fn new(router: Arc<NotificationRouter>, org_id: i64) -> Self {
        Self { router, org_id }
    }
}

#[async_trait]
impl AlertmanagerApi for LocalAlertmanagerApi {
    async fn get_alerts(&self, params: &AlertParams) -> ApiResult<Vec<GettableAlert>> {
        Ok(self.router.get_alerts(self.org_id, &params.to_filter()?)?)
    }

    async fn get_alert_groups(&self, params: &AlertParams) -> ApiResult<Vec<AlertGroup>> {
        Ok(self.router.get_alert_groups(self.org_id, &params.to_filter()?)?)
    }

    async fn list_silences(&self, filter: &[String]) -> ApiResult<Vec<GettableSilence>> {
        let matchers = Matchers::parse_all(filter)?;
        Ok(self.router.list_silences(self.org_id, &matchers)?)
    }

    async fn get_silence(&self, id: &str) -> ApiResult<GettableSilence> {
        Ok(self.router.get_silence(self.org_id, id)?)
    }

    async fn create_silence(&self, silence: PostableSilence) -> ApiResult<PostSilenceResponse> {
        let silence_id = self.router.create_silence(self.org_id, &silence, Utc::now())?;
        Ok(PostSilenceResponse { silence_id })
    }

    async fn delete_silence(&self, id: &str) -> ApiResult<()> {
        Ok(self.router.delete_silence(self.org_id, id)?)
    }

    async fn get_config(&self) -> ApiResult<UserConfig> {
        Ok(self.router.get_config(self.org_id)?)
    }

    async fn post_config(&self, config: UserConfig) -> ApiResult<()> {
        Ok(self.router.save_and_apply_config(self.org_id, config)?)
    }
}

/// Configuration as exchanged with a remote Alertmanager: the routing
/// configuration travels as an embedded YAML document.
#[derive(Debug, Serialize, Deserialize)]
struct RemoteUserConfig {
    #[serde(default)]
    template_files: BTreeMap<String, String>,
    alertmanager_config: String,
}

/// A remote Alertmanager behind a datasource.
#[derive(Debug, Clone)]
pub struct ProxyAlertmanagerApi {
    client: ProxyClient,
    datasource: Datasource,
    headers: HeaderMap,
}

impl ProxyAlertmanagerApi {
    /// Creates the proxy implementation for a datasource.
    #[must_use]
    pub const fn new(client: ProxyClient, datasource: Datasource, headers: HeaderMap) -> Self {
        Self {
            client,
            datasource,
            headers,
        }
    }

    fn request(&self, method: Method, path: &str) -> ProxyRequest {
        ProxyRequest::new(method, path, self.headers.clone())
    }
}

#[async_trait]
impl AlertmanagerApi for ProxyAlertmanagerApi {
    async fn get_alerts(&self, params: &AlertParams) -> ApiResult<Vec<GettableAlert>> {
        let request = self
            .request(Method::GET, "/api/v2/alerts")
            .with_query(params.to_query());
        self.client.send_json(&self.datasource, request).await
    }

    async fn get_alert_groups(&self, params: &AlertParams) -> ApiResult<Vec<AlertGroup>> {
        let request = self
            .request(Method::GET, "/api/v2/alerts/groups")
            .with_query(params.to_query());
        self.client.send_json(&self.datasource, request).await
    }

    async fn list_silences(&self, filter: &[String]) -> ApiResult<Vec<GettableSilence>> {
        let query = filter
            .iter()
            .map(|m| ("filter".to_string(), m.clone()))
            .collect();
        let request = self.request(Method::GET, "/api/v2/silences").with_query(query);
        self.client.send_json(&self.datasource, request).await
    }

    async fn get_silence(&self, id: &str) -> ApiResult<GettableSilence> {
        let request = self
            .request(Method::GET, "/api/v2/silence")
            .segment(id);
        self.client.send_json(&self.datasource, request).await
    }

    async fn create_silence(&self, silence: PostableSilence) -> ApiResult<PostSilenceResponse> {
        let request = self
            .request(Method::POST, "/api/v2/silences")
            .with_body(ProxyBody::json(&silence)?);
        self.client.send_json(&self.datasource, request).await
    }

    async fn delete_silence(&self, id: &str) -> ApiResult<()> {
        let request = self
            .request(Method::DELETE, "/api/v2/silence")
            .segment(id);
        self.client.send(&self.datasource, request).await?;
        Ok(())
    }

    async fn get_config(&self) -> ApiResult<UserConfig> {
        let request = self.request(Method::GET, "/api/v1/alerts");
        let remote: RemoteUserConfig = self.client.send_yaml(&self.datasource, request).await?;
        let alertmanager_config: AlertmanagerConfig =
            serde_yaml::from_str(&remote.alertmanager_config)
                .map_err(|e| ApiError::InvalidUpstreamResponse(e.to_string()))?;
        Ok(UserConfig {
            template_files: remote.template_files,
            alertmanager_config,
        })
    }

    async fn post_config(&self, config: UserConfig) -> ApiResult<()> {
        let remote = RemoteUserConfig {
            template_files: config.template_files,
            alertmanager_config: serde_yaml::to_string(&config.alertmanager_config)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        };
        let request = self
            .request(Method::POST, "/api/v1/alerts")
            .with_body(ProxyBody::yaml(&remote)?);
        self.client.send(&self.datasource, request).await?;
        Ok(())
    }
}

/// The Alertmanager implementation serving a request.
pub type ForkedAlertmanager = Forked<LocalAlertmanagerApi, ProxyAlertmanagerApi>;

#[async_trait]
impl AlertmanagerApi for ForkedAlertmanager {
    async fn get_alerts(&self, params: &AlertParams) -> ApiResult<Vec<GettableAlert>> {
        forked!(self, api => api.get_alerts(params).await)
    }

    async fn get_alert_groups(&self, params: &AlertParams) -> ApiResult<Vec<AlertGroup>> {
        forked!(self, api => api.get_alert_groups(params).await)
    }

    async fn list_silences(&self, filter: &[String]) -> ApiResult<Vec<GettableSilence>> {
        forked!(self, api => api.list_silences(filter).await)
    }

    async fn get_silence(&self, id: &str) -> ApiResult<GettableSilence> {
        forked!(self, api => api.get_silence(id).await)
    }

    async fn create_silence(&self, silence: PostableSilence) -> ApiResult<PostSilenceResponse> {
        forked!(self, api => api.create_silence(silence).await)
    }

    async fn delete_silence(&self, id: &str) -> ApiResult<()> {
        forked!(self, api => api.delete_silence(id).await)
    }

    async fn get_config(&self) -> ApiResult<UserConfig> {
        forked!(self, api => api.get_config().await)
    }

    async fn post_config(&self, config: UserConfig) -> ApiResult<()> {
        forked!(self, api => api.post_config(config).await)
    }
}

async fn alertmanager(
    state: &ApiState,
    ctx: RequestContext,
    recipient: &str,
) -> ApiResult<ForkedAlertmanager> {
    Ok(
        match state.resolve(ctx.org_id, recipient, Family::Alertmanager).await? {
            Backend::Local => Forked::Local(LocalAlertmanagerApi::new(
                Arc::clone(state.router()),
                ctx.org_id,
            )),
            Backend::Proxy(ds) => Forked::Proxy(ProxyAlertmanagerApi::new(
                state.proxy().clone(),
                ds,
                ctx.forward_headers,
            )),
        },
    )
}

/// Handle GET `/api/alertmanager/{recipient}/api/v2/alerts`.
pub async fn get_alerts(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
    Query(params): Query<AlertParams>,
) -> ApiResult<Json<Vec<GettableAlert>>> {
    let api = alertmanager(&state, ctx, &recipient).await?;
    api.get_alerts(&params).await.map(Json)
}

/// Handle GET `/api/alertmanager/{recipient}/api/v2/alerts/groups`.
pub async fn get_alert_groups(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
    Query(params): Query<AlertParams>,
) -> ApiResult<Json<Vec<AlertGroup>>> {
    let api = alertmanager(&state, ctx, &recipient).await?;
    api.get_alert_groups(&params).await.map(Json)
}

/// Handle GET `/api/alertmanager/{recipient}/api/v2/silences`.
pub async fn list_silences(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
    Query(params): Query<SilenceParams>,
) -> ApiResult<Json<Vec<GettableSilence>>> {
    let api = alertmanager(&state, ctx, &recipient).await?;
    api.list_silences(&params.filter).await.map(Json)
}

/// Handle POST `/api/alertmanager/{recipient}/api/v2/silences`.
pub async fn create_silence(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
    Json(silence): Json<PostableSilence>,
) -> ApiResult<Json<PostSilenceResponse>> {
    let org_id = ctx.org_id;
    let api = alertmanager(&state, ctx, &recipient).await?;
    let response = api.create_silence(silence).await?;
    info!(org_id, recipient = %recipient, silence_id = %response.silence_id, "silence created");
    Ok(Json(response))
}

/// Handle GET `/api/alertmanager/{recipient}/api/v2/silence/{id}`.
pub async fn get_silence(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path((recipient, id)): Path<(String, String)>,
) -> ApiResult<Json<GettableSilence>> {
    let api = alertmanager(&state, ctx, &recipient).await?;
    api.get_silence(&id).await.map(Json)
}

/// Handle DELETE `/api/alertmanager/{recipient}/api/v2/silence/{id}`.
pub async fn delete_silence(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path((recipient, id)): Path<(String, String)>,
) -> ApiResult<Json<ApiMessage>> {
    let api = alertmanager(&state, ctx, &recipient).await?;
    api.delete_silence(&id).await?;
    Ok(Json(ApiMessage::new("silence deleted")))
}

/// Handle GET `/api/alertmanager/{recipient}/config/api/v1/alerts`.
pub async fn get_config(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
) -> ApiResult<Json<UserConfig>> {
    let api = alertmanager(&state, ctx, &recipient).await?;
    api.get_config().await.map(Json)
}

/// Handle POST `/api/alertmanager/{recipient}/config/api/v1/alerts`.
pub async fn post_config(
    State(state): State<Arc<ApiState>>,
    ctx: RequestContext,
    Path(recipient): Path<String>,
    Json(config): Json<UserConfig>,
) -> ApiResult<Json<ApiMessage>> {
    let api = alertmanager(&state, ctx, &recipient).await?;
    api.post_config(config).await?;
    Ok(Json(ApiMessage::new("configuration saved")))
}
