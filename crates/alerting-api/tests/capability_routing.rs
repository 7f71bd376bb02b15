//! Integration tests for recipient routing: local and proxied backends must
//! answer with the same shapes, and local writes respect quotas.

use std::sync::Arc;

use alerting_api::{ApiState, ServerConfig, create_router};
use alerting_core::{
    Capabilities, Datasource, DatasourceType, Evaluator, Labels, MemoryDatasourceCache,
    MemoryInstanceStore, MemoryRuleStore, NoopNotifier, RuleCountQuota, RuleStore, Scheduler,
    SchedulerConfig, StateManager, StaticQueryExecutor,
};
use alerting_notify::{NotificationRouter, PostableAlert, RouterConfig};
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::routing::{get, post};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

// ==================== Helpers ====================

struct Harness {
    state: Arc<ApiState>,
    store: Arc<MemoryRuleStore>,
    datasources: Arc<MemoryDatasourceCache>,
    app: Router,
}

fn harness(quota: Option<u64>) -> Harness {
    let store = Arc::new(MemoryRuleStore::new());
    let scheduler = Scheduler::new(
        SchedulerConfig::default(),
        Evaluator::new(Arc::new(StaticQueryExecutor::new())),
        Arc::new(StateManager::new(Arc::new(MemoryInstanceStore::new()))),
        Arc::new(NoopNotifier),
        store.clone(),
    );
    let datasources = Arc::new(MemoryDatasourceCache::new());
    let mut state = ApiState::new(
        ServerConfig::default(),
        scheduler,
        Arc::new(NotificationRouter::new(RouterConfig::default())),
        store.clone(),
        datasources.clone(),
    )
    .expect("state");
    if let Some(limit) = quota {
        state = state.with_quota(Arc::new(RuleCountQuota::new(store.clone(), Some(limit))));
    }
    let state = Arc::new(state);
    Harness {
        app: create_router(Arc::clone(&state)),
        state,
        store,
        datasources,
    }
}

async fn spawn_upstream(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move { axum::serve(listener, router).await });
    format!("http://{addr}")
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.expect("body").to_bytes();
    (status, headers, body)
}

fn get_req(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, "Bearer caller-token")
        .body(Body::empty())
        .expect("request")
}

fn json_of(body: &Bytes) -> Value {
    serde_json::from_slice(body).expect("json body")
}

fn ruler_caps() -> Capabilities {
    Capabilities {
        alertmanager: false,
        ruler: true,
        prometheus_api: true,
    }
}

fn rule_group() -> Value {
    json!({
        "name": "cpu",
        "interval": "1m",
        "rules": [{
            "for": "5m",
            "grafana_alert": {
                "uid": "cpu-high",
                "title": "HighCPU",
                "condition": {"refId": "A", "operator": ">", "threshold": 80.0},
                "data": [{"refId": "A", "datasourceUid": "prom", "model": {"expr": "cpu"}}]
            }
        }]
    })
}

// ==================== Alertmanager Family ====================

#[tokio::test]
async fn proxied_alerts_match_local_shape() {
    let h = harness(None);
    let local = h.state.router().local(1).expect("local alertmanager");
    local.put_alerts(
        &[PostableAlert {
            labels: Labels::new().with("alertname", "HighCPU").with("host", "a"),
            annotations: Labels::new(),
            starts_at: None,
            ends_at: None,
            generator_url: None,
        }],
        chrono::Utc::now(),
    );

    let (status, _, local_body) = call(&h.app, get_req("/api/alertmanager/grafana/api/v2/alerts")).await;
    assert_eq!(status, StatusCode::OK);
    let local_json = json_of(&local_body);
    assert_eq!(local_json.as_array().map(Vec::len), Some(1));

    let seen_auth = Arc::new(Mutex::new(None::<String>));
    let upstream = {
        let payload = local_json.clone();
        let seen_auth = Arc::clone(&seen_auth);
        Router::new().route(
            "/api/v2/alerts",
            get(move |headers: HeaderMap| async move {
                *seen_auth.lock() = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                axum::Json(payload)
            }),
        )
    };
    let url = spawn_upstream(upstream).await;
    h.datasources.insert(
        Datasource::new("am", DatasourceType::Alertmanager, url).with_basic_auth("svc", "secret"),
    );

    let (status, _, proxied_body) = call(&h.app, get_req("/api/alertmanager/am/api/v2/alerts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&proxied_body), local_json);

    let auth = seen_auth.lock().clone().expect("upstream saw credentials");
    assert!(auth.starts_with("Basic "));
    assert!(!auth.contains("caller-token"));
}

#[tokio::test]
async fn upstream_errors_pass_through() {
    let h = harness(None);
    let upstream = Router::new().route(
        "/api/v2/silences",
        get(|| async {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                [(header::CONTENT_TYPE, "text/plain")],
                "bad matcher",
            )
        }),
    );
    let url = spawn_upstream(upstream).await;
    h.datasources
        .insert(Datasource::new("am", DatasourceType::Alertmanager, url));

    let (status, headers, body) =
        call(&h.app, get_req("/api/alertmanager/am/api/v2/silences")).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("text/plain")
    );
    assert_eq!(&body[..], b"bad matcher");
}

#[tokio::test]
async fn unreachable_backend_is_bad_gateway() {
    let h = harness(None);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    h.datasources.insert(Datasource::new(
        "am",
        DatasourceType::Alertmanager,
        format!("http://{addr}"),
    ));

    let (status, _, body) = call(&h.app, get_req("/api/alertmanager/am/api/v2/alerts")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json_of(&body)["error"], "bad_gateway");
}

// ==================== Prometheus Family ====================

#[tokio::test]
async fn proxied_rules_match_local_shape() {
    let h = harness(None);
    let request = Request::builder()
        .method("POST")
        .uri("/api/ruler/grafana/api/v1/rules/infra")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(rule_group().to_string()))
        .expect("request");
    let (status, _, _) = call(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, local_body) = call(&h.app, get_req("/api/prometheus/grafana/api/v1/rules")).await;
    assert_eq!(status, StatusCode::OK);
    let local_json = json_of(&local_body);

    let upstream = {
        let payload = local_json.clone();
        Router::new().route(
            "/prometheus/api/v1/rules",
            get(move || async move { axum::Json(payload) }),
        )
    };
    let url = spawn_upstream(upstream).await;
    h.datasources.insert(
        Datasource::new("logs", DatasourceType::Loki, url).with_capabilities(ruler_caps()),
    );

    let (status, _, proxied_body) = call(&h.app, get_req("/api/prometheus/logs/api/v1/rules")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&proxied_body), local_json);
    h.state.scheduler().shutdown();
}

// ==================== Ruler Family ====================

#[tokio::test]
async fn proxied_group_is_posted_as_yaml() {
    let h = harness(None);
    let received = Arc::new(Mutex::new(None::<(String, String)>));
    let upstream = {
        let received = Arc::clone(&received);
        Router::new().route(
            "/api/v1/rules/{namespace}",
            post(move |headers: HeaderMap, body: String| async move {
                let content_type = headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                *received.lock() = Some((content_type, body));
                StatusCode::ACCEPTED
            }),
        )
    };
    let url = spawn_upstream(upstream).await;
    h.datasources.insert(
        Datasource::new("prom", DatasourceType::Prometheus, url).with_capabilities(ruler_caps()),
    );

    let group = json!({
        "name": "cpu",
        "rules": [{"alert": "HighCPU", "expr": "cpu > 80", "for": "5m"}]
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/ruler/prom/api/v1/rules/infra")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(group.to_string()))
        .expect("request");
    let (status, _, _) = call(&h.app, request).await;
    assert_eq!(status, StatusCode::OK);

    let (content_type, body) = received.lock().clone().expect("upstream received group");
    assert_eq!(content_type, "application/yaml");
    let posted: alerting_api::RuleGroupConfig = serde_yaml::from_str(&body).expect("yaml");
    assert_eq!(posted.name, "cpu");
    assert_eq!(posted.rules[0].expr.as_deref(), Some("cpu > 80"));
}

#[tokio::test]
async fn quota_rejection_starts_no_loop() {
    let h = harness(Some(0));
    let request = Request::builder()
        .method("POST")
        .uri("/api/ruler/grafana/api/v1/rules/infra")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(rule_group().to_string()))
        .expect("request");

    let (status, _, body) = call(&h.app, request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json_of(&body)["error"], "quota_exceeded");
    assert!(h.state.scheduler().scheduled_rules().is_empty());
    assert_eq!(h.store.count_rules(1).await.expect("count"), 0);
}

#[tokio::test]
async fn ruler_rejects_alertmanager_datasource() {
    let h = harness(None);
    h.datasources
        .insert(Datasource::new("am", DatasourceType::Alertmanager, "http://127.0.0.1:1"));

    let (status, _, body) = call(&h.app, get_req("/api/ruler/am/api/v1/rules")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_of(&body)["error"], "unexpected_backend");
}
