//! Notification router.
//!
//! Takes committed alert instances from the state manager and delivers them
//! to the local Alertmanager of the organisation and/or its external
//! Alertmanagers, according to the organisation's backend choice.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use alerting_core::{AlertInstance, AlertNotifier, InstanceState, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{NotifyError, Result};
use crate::local::{AlertFilter, LocalAlertmanager, LocalSettings, MultiOrgAlertmanager};
use crate::matcher::Matchers;
use crate::models::{AlertGroup, GettableAlert, GettableSilence, PostableAlert, PostableSilence, UserConfig};
use crate::remote::AlertSender;

/// Which Alertmanagers receive an organisation's alerts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertmanagersChoice {
    /// Local Alertmanager only.
    Internal,
    /// External Alertmanagers only.
    External,
    /// Both.
    #[default]
    All,
}

impl AlertmanagersChoice {
    const fn local(self) -> bool {
        matches!(self, Self::Internal | Self::All)
    }

    const fn external(self) -> bool {
        matches!(self, Self::External | Self::All)
    }
}

/// Configuration for the notification router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Retry policy for remote delivery.
    pub retry: RetryPolicy,
    /// Deadline for delivering one batch to one backend, retries included.
    pub delivery_timeout: Duration,
    /// Base URL used to build generator links.
    pub external_url: String,
    /// End time given to firing alerts, renewed on every resend.
    pub alert_ttl: Duration,
    /// Settings of the local Alertmanagers.
    pub local: LocalSettings,
    /// Choice for organisations without explicit routing.
    pub default_choice: AlertmanagersChoice,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            delivery_timeout: Self::DEFAULT_DELIVERY_TIMEOUT,
            external_url: "http://localhost:3000".to_string(),
            alert_ttl: Duration::from_secs(4 * 60),
            local: LocalSettings::default(),
            default_choice: AlertmanagersChoice::All,
        }
    }
}

impl RouterConfig {
    /// Default per-backend delivery deadline. Stays below the scheduler's
    /// notification timeout so failures are recorded before it fires.
    pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(20);

    /// Sets the per-backend delivery deadline.
    #[must_use]
    pub const fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the external URL.
    #[must_use]
    pub fn with_external_url(mut self, url: impl Into<String>) -> Self {
        self.external_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the alert TTL.
    #[must_use]
    pub const fn with_alert_ttl(mut self, ttl: Duration) -> Self {
        self.alert_ttl = ttl;
        self
    }

    /// Sets the local Alertmanager settings.
    #[must_use]
    pub const fn with_local(mut self, local: LocalSettings) -> Self {
        self.local = local;
        self
    }

    /// Sets the default backend choice.
    #[must_use]
    pub const fn with_default_choice(mut self, choice: AlertmanagersChoice) -> Self {
        self.default_choice = choice;
        self
    }
}

/// Delivery health of an external backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    /// Backend name.
    pub name: String,
    /// Set after retries were exhausted, cleared on the next success.
    pub degraded: bool,
    /// Failed deliveries since the last success.
    pub consecutive_failures: u32,
    /// Last delivery error.
    pub last_error: Option<String>,
    /// Last successful delivery.
    pub last_success: Option<DateTime<Utc>>,
    /// Last failed delivery.
    pub last_failure: Option<DateTime<Utc>>,
}

impl BackendHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            degraded: false,
            consecutive_failures: 0,
            last_error: None,
            last_success: None,
            last_failure: None,
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Alerts stored in the local Alertmanager.
    pub local: usize,
    /// Alerts withheld from external backends by silences.
    pub silenced: usize,
    /// Backends that accepted the batch.
    pub delivered: Vec<String>,
    /// Backends that failed after retries.
    pub failed: Vec<String>,
}

#[derive(Clone, Default)]
struct OrgRouting {
    choice: AlertmanagersChoice,
    senders: Vec<Arc<dyn AlertSender>>,
}

/// Routes alert instances to Alertmanagers and serves the local ones.
pub struct NotificationRouter {
    config: RouterConfig,
    local: MultiOrgAlertmanager,
    orgs: RwLock<HashMap<i64, OrgRouting>>,
    health: RwLock<BTreeMap<String, BackendHealth>>,
}

impl NotificationRouter {
    /// Creates a router with no external backends.
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self {
            local: MultiOrgAlertmanager::new(config.local),
            config,
            orgs: RwLock::new(HashMap::new()),
            health: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Sets the backend choice and external Alertmanagers of an organisation.
    pub fn set_org_backends(
        &self,
        org_id: i64,
        choice: AlertmanagersChoice,
        senders: Vec<Arc<dyn AlertSender>>,
    ) {
        {
            let mut health = self.health.write();
            for sender in &senders {
                health
                    .entry(sender.name().to_string())
                    .or_insert_with(|| BackendHealth::new(sender.name()));
            }
        }
        info!(
            org_id,
            choice = ?choice,
            external = senders.len(),
            "alertmanager routing updated"
        );
        self.orgs.write().insert(org_id, OrgRouting { choice, senders });
    }

    /// Backend choice of an organisation.
    #[must_use]
    pub fn choice(&self, org_id: i64) -> AlertmanagersChoice {
        self.orgs
            .read()
            .get(&org_id)
            .map_or(self.config.default_choice, |r| r.choice)
    }

    fn routing(&self, org_id: i64) -> OrgRouting {
        self.orgs.read().get(&org_id).cloned().unwrap_or_else(|| OrgRouting {
            choice: self.config.default_choice,
            senders: Vec::new(),
        })
    }

    /// The local Alertmanager of an organisation.
    ///
    /// # Errors
    ///
    /// Fails only if the default configuration does not compile.
    pub fn local(&self, org_id: i64) -> Result<Arc<LocalAlertmanager>> {
        self.local.for_org(org_id)
    }

    /// Converts an instance to the Alertmanager wire form.
    #[must_use]
    pub fn to_postable(&self, instance: &AlertInstance, now: DateTime<Utc>) -> PostableAlert {
        let ttl = chrono::Duration::from_std(self.config.alert_ttl).unwrap_or(chrono::Duration::MAX);
        let (starts_at, ends_at) = if instance.current_state == InstanceState::Alerting {
            (Some(instance.state_since), now.checked_add_signed(ttl))
        } else {
            (None, Some(instance.resolved_at.unwrap_or(now)))
        };
        PostableAlert {
            labels: instance.labels.clone(),
            annotations: instance.annotations.clone(),
            starts_at,
            ends_at,
            generator_url: Some(format!(
                "{}/alerting/grafana/{}/view",
                self.config.external_url, instance.rule_uid
            )),
        }
    }

    /// Delivers instances of one organisation.
    ///
    /// Silenced alerts are stored locally as suppressed and withheld from
    /// external backends. Remote failures are retried, then recorded against
    /// the backend; they never fail the dispatch.
    ///
    /// # Errors
    ///
    /// Fails only if the local Alertmanager cannot be created.
    pub async fn dispatch(
        &self,
        org_id: i64,
        instances: &[AlertInstance],
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();
        if instances.is_empty() {
            return Ok(report);
        }

        let routing = self.routing(org_id);
        let local = self.local.for_org(org_id)?;
        let alerts: Vec<PostableAlert> = instances.iter().map(|i| self.to_postable(i, now)).collect();

        // External-only organisations without backends fall back to local.
        if routing.choice.local() || routing.senders.is_empty() {
            report.local = local.put_alerts(&alerts, now);
        }

        if !routing.choice.external() || routing.senders.is_empty() {
            return Ok(report);
        }

        let outbound: Vec<PostableAlert> = alerts
            .into_iter()
            .filter(|a| !local.is_silenced(&a.labels, now))
            .collect();
        report.silenced = instances.len() - outbound.len();
        if outbound.is_empty() {
            debug!(org_id, silenced = report.silenced, "all alerts silenced");
            return Ok(report);
        }

        let outbound = &outbound;
        let deadline = self.config.delivery_timeout;
        let sends = routing.senders.iter().map(|sender| async move {
            let operation = format!("deliver to {}", sender.name());
            let attempts = self.config.retry.run(&operation, || sender.send(outbound));
            let result = tokio::time::timeout(deadline, attempts).await.unwrap_or_else(|_| {
                Err(NotifyError::Delivery {
                    backend: sender.name().to_string(),
                    reason: format!("timed out after {deadline:?}"),
                })
            });
            (sender.name().to_string(), result)
        });

        for (name, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    self.record_success(&name, Utc::now());
                    report.delivered.push(name);
                }
                Err(e) => {
                    warn!(org_id, backend = %name, error = %e, "backend degraded");
                    self.record_failure(&name, &e.to_string(), Utc::now());
                    report.failed.push(name);
                }
            }
        }
        Ok(report)
    }

    fn record_success(&self, name: &str, at: DateTime<Utc>) {
        let mut health = self.health.write();
        let entry = health
            .entry(name.to_string())
            .or_insert_with(|| BackendHealth::new(name));
        if entry.degraded {
            info!(backend = %name, "backend recovered");
        }
        entry.degraded = false;
        entry.consecutive_failures = 0;
        entry.last_success = Some(at);
    }

    fn record_failure(&self, name: &str, error: &str, at: DateTime<Utc>) {
        let mut health = self.health.write();
        let entry = health
            .entry(name.to_string())
            .or_insert_with(|| BackendHealth::new(name));
        entry.degraded = true;
        entry.consecutive_failures += 1;
        entry.last_error = Some(error.to_string());
        entry.last_failure = Some(at);
    }

    /// Delivery health of every known external backend, by name.
    #[must_use]
    pub fn backend_health(&self) -> Vec<BackendHealth> {
        self.health.read().values().cloned().collect()
    }

    /// Creates or updates a silence in the local Alertmanager. The silence
    /// becomes active at `now` unless it starts later.
    ///
    /// # Errors
    ///
    /// See [`LocalAlertmanager::create_silence`].
    pub fn create_silence(
        &self,
        org_id: i64,
        silence: &PostableSilence,
        now: DateTime<Utc>,
    ) -> Result<String> {
        self.local.for_org(org_id)?.create_silence(silence, now)
    }

    /// Fetches a silence.
    ///
    /// # Errors
    ///
    /// Returns `NotifyError::SilenceNotFound` if absent.
    pub fn get_silence(&self, org_id: i64, id: &str) -> Result<GettableSilence> {
        self.local.for_org(org_id)?.get_silence(id, Utc::now())
    }

    /// Lists silences matching the filter.
    ///
    /// # Errors
    ///
    /// Fails only if the local Alertmanager cannot be created.
    pub fn list_silences(&self, org_id: i64, filter: &Matchers) -> Result<Vec<GettableSilence>> {
        Ok(self.local.for_org(org_id)?.list_silences(filter, Utc::now()))
    }

    /// Expires a silence.
    ///
    /// # Errors
    ///
    /// See [`LocalAlertmanager::delete_silence`].
    pub fn delete_silence(&self, org_id: i64, id: &str) -> Result<()> {
        self.local.for_org(org_id)?.delete_silence(id, Utc::now())
    }

    /// Lists alerts of the local Alertmanager.
    ///
    /// # Errors
    ///
    /// Fails only if the local Alertmanager cannot be created.
    pub fn get_alerts(&self, org_id: i64, filter: &AlertFilter) -> Result<Vec<GettableAlert>> {
        Ok(self.local.for_org(org_id)?.get_alerts(filter, Utc::now()))
    }

    /// Lists alert groups of the local Alertmanager.
    ///
    /// # Errors
    ///
    /// Fails only if the local Alertmanager cannot be created.
    pub fn get_alert_groups(&self, org_id: i64, filter: &AlertFilter) -> Result<Vec<AlertGroup>> {
        Ok(self.local.for_org(org_id)?.get_alert_groups(filter, Utc::now()))
    }

    /// The applied local Alertmanager configuration.
    ///
    /// # Errors
    ///
    /// Fails only if the local Alertmanager cannot be created.
    pub fn get_config(&self, org_id: i64) -> Result<UserConfig> {
        Ok(self.local.for_org(org_id)?.config())
    }

    /// Validates and applies a local Alertmanager configuration.
    ///
    /// # Errors
    ///
    /// See [`LocalAlertmanager::apply_config`].
    pub fn save_and_apply_config(&self, org_id: i64, config: UserConfig) -> Result<()> {
        self.local.for_org(org_id)?.apply_config(config)
    }

    /// Garbage-collects the local Alertmanagers every `interval` until cancelled.
    pub async fn run_maintenance(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let (alerts, silences) = self.local.gc(Utc::now());
                    debug!(alerts, silences, "notification maintenance pass");
                }
            }
        }
    }
}

#[async_trait]
impl AlertNotifier for NotificationRouter {
    async fn notify(&self, org_id: i64, instances: &[AlertInstance]) -> alerting_core::Result<()> {
        let report = self.dispatch(org_id, instances, Utc::now()).await?;
        debug!(
            org_id,
            local = report.local,
            silenced = report.silenced,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "alerts dispatched"
        );
        Ok(())
    }
}
