//! HTTP API for the alerting engine.
//!
//! `alerting-api` serves three API families for a recipient named in the
//! request path:
//!
//! - **Alertmanager**: alerts, alert groups, silences and configuration
//! - **Prometheus**: rule and alert listings
//! - **Ruler**: rule groups by namespace
//!
//! The recipient `grafana` is answered by the local engine. Any other value
//! names a datasource; requests are forwarded to its backend with the
//! caller's credentials replaced by the datasource's own, and answers are
//! decoded into the same types the local engine returns.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use alerting_api::{ApiServer, ApiState, ServerConfig};
//! use alerting_core::{
//!     Evaluator, MemoryDatasourceCache, MemoryInstanceStore, MemoryRuleStore, NoopNotifier,
//!     Scheduler, SchedulerConfig, StateManager, StaticQueryExecutor,
//! };
//! use alerting_notify::{NotificationRouter, RouterConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rules = Arc::new(MemoryRuleStore::new());
//! let scheduler = Scheduler::new(
//!     SchedulerConfig::default(),
//!     Evaluator::new(Arc::new(StaticQueryExecutor::new())),
//!     Arc::new(StateManager::new(Arc::new(MemoryInstanceStore::new()))),
//!     Arc::new(NoopNotifier),
//!     rules.clone(),
//! );
//! let state = ApiState::new(
//!     ServerConfig::default(),
//!     scheduler,
//!     Arc::new(NotificationRouter::new(RouterConfig::default())),
//!     rules,
//!     Arc::new(MemoryDatasourceCache::new()),
//! )?;
//! ApiServer::new(state)
//!     .serve_with_shutdown(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alertmanager;
pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod prometheus;
pub mod proxy;
pub mod routes;
pub mod ruler;
pub mod server;
pub mod state;
pub mod testing;
pub mod types;

pub use alertmanager::{AlertParams, AlertmanagerApi, LocalAlertmanagerApi, ProxyAlertmanagerApi};
pub use backend::{Backend, Family, Forked, LOCAL_RECIPIENT};
pub use config::{ProxyConfig, ServerConfig};
pub use error::{ApiError, ApiResult};
pub use extract::{DEFAULT_ORG_ID, ORG_ID_HEADER, RequestContext};
pub use prometheus::{LocalPrometheusApi, PrometheusApi, ProxyPrometheusApi};
pub use proxy::{ProxyBody, ProxyClient, ProxyRequest};
pub use routes::{HealthResponse, create_router};
pub use ruler::{LocalRulerApi, ProxyRulerApi, RulerApi};
pub use server::ApiServer;
pub use state::ApiState;
pub use testing::RuleTestResponse;
pub use types::{
    AlertDiscovery, AlertingRule, ApiMessage, GrafanaAlertRule, NamespaceConfig, PromAlert,
    PromResponse, RuleDiscovery, RuleGroup, RuleGroupConfig, RuleNode,
};
