//! Route configuration for the alerting API.

use std::sync::Arc;

use alerting_notify::BackendHealth;
use axum::Json;
use axum::extract::State;
use axum::routing::{Router, get, post};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::state::ApiState;
use crate::{alertmanager, prometheus, ruler, testing};

/// Response of the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `degraded` while a notification backend is failing.
    pub status: &'static str,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Number of rules with a running evaluation loop.
    pub scheduled_rules: usize,
    /// Health of outbound notification backends.
    pub backends: Vec<BackendHealth>,
}

/// Handle GET `/api/health`.
pub async fn health_check(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let backends = state.router().backend_health();
    let status = if backends.iter().any(|b| b.degraded) {
        "degraded"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status,
        uptime_secs: state.uptime_secs(),
        scheduled_rules: state.scheduler().scheduled_rules().len(),
        backends,
    })
}

/// Create the alerting API router.
pub fn create_router(state: Arc<ApiState>) -> Router {
    let alertmanager_routes = Router::new()
        .route("/api/v2/alerts", get(alertmanager::get_alerts))
        .route("/api/v2/alerts/groups", get(alertmanager::get_alert_groups))
        .route(
            "/api/v2/silences",
            get(alertmanager::list_silences).post(alertmanager::create_silence),
        )
        .route(
            "/api/v2/silence/{id}",
            get(alertmanager::get_silence).delete(alertmanager::delete_silence),
        )
        .route(
            "/config/api/v1/alerts",
            get(alertmanager::get_config).post(alertmanager::post_config),
        );

    let prometheus_routes = Router::new()
        .route("/api/v1/rules", get(prometheus::list_rules))
        .route("/api/v1/alerts", get(prometheus::list_alerts));

    let ruler_routes = Router::new()
        .route("/api/v1/rules", get(ruler::get_rules))
        .route(
            "/api/v1/rules/{namespace}",
            get(ruler::get_namespace)
                .post(ruler::post_group)
                .delete(ruler::delete_namespace),
        )
        .route(
            "/api/v1/rules/{namespace}/{group}",
            get(ruler::get_group).delete(ruler::delete_group),
        );

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .nest("/alertmanager/{recipient}", alertmanager_routes)
        .nest("/prometheus/{recipient}", prometheus_routes)
        .nest("/ruler/{recipient}", ruler_routes)
        .route("/v1/rule/test/{recipient}", post(testing::test_rule_handler));

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
