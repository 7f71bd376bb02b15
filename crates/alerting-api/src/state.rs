//! Shared state for the API server.

use std::sync::Arc;
use std::time::Instant;

use alerting_core::{DatasourceCache, QuotaService, RuleStore, Scheduler, Unlimited};
use alerting_notify::NotificationRouter;

use crate::backend::{self, Backend, Family};
use crate::config::ServerConfig;
use crate::error::ApiResult;
use crate::proxy::ProxyClient;

/// Shared state for the API server.
pub struct ApiState {
    config: ServerConfig,
    scheduler: Scheduler,
    router: Arc<NotificationRouter>,
    rules: Arc<dyn RuleStore>,
    datasources: Arc<dyn DatasourceCache>,
    quota: Arc<dyn QuotaService>,
    proxy: ProxyClient,
    start_time: Instant,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl ApiState {
    /// Create the state with unlimited quotas and a proxy client built from
    /// `config.proxy`.
    ///
    /// # Errors
    ///
    /// Returns an error if the proxy client fails to build.
    pub fn new(
        config: ServerConfig,
        scheduler: Scheduler,
        router: Arc<NotificationRouter>,
        rules: Arc<dyn RuleStore>,
        datasources: Arc<dyn DatasourceCache>,
    ) -> ApiResult<Self> {
        let proxy = ProxyClient::new(&config.proxy)?;
        Ok(Self {
            config,
            scheduler,
            router,
            rules,
            datasources,
            quota: Arc::new(Unlimited),
            proxy,
            start_time: Instant::now(),
        })
    }

    /// Replace the quota service.
    #[must_use]
    pub fn with_quota(mut self, quota: Arc<dyn QuotaService>) -> Self {
        self.quota = quota;
        self
    }

    /// Replace the proxy client.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyClient) -> Self {
        self.proxy = proxy;
        self
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The rule scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The notification router.
    #[must_use]
    pub const fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// The rule store.
    #[must_use]
    pub const fn rules(&self) -> &Arc<dyn RuleStore> {
        &self.rules
    }

    /// The quota service.
    #[must_use]
    pub fn quota(&self) -> &dyn QuotaService {
        self.quota.as_ref()
    }

    /// The proxy client.
    #[must_use]
    pub const fn proxy(&self) -> &ProxyClient {
        &self.proxy
    }

    /// Server uptime in seconds.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Resolves the backend serving `family` for a recipient.
    ///
    /// # Errors
    ///
    /// See [`backend::resolve`].
    pub async fn resolve(&self, org_id: i64, recipient: &str, family: Family) -> ApiResult<Backend> {
        backend::resolve(self.datasources.as_ref(), org_id, recipient, family).await
    }
}
