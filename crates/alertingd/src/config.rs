//! Daemon configuration.
//!
//! Loaded from a TOML file. Every section is optional; missing values take
//! the defaults of the component they configure.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use alerting_api::{ProxyConfig, ServerConfig};
use alerting_core::{Datasource, RetryPolicy, SchedulerConfig, StateManagerConfig};
use alerting_notify::{AlertmanagersChoice, LocalSettings, RouterConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`AppConfig`].
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Listen address.
    pub bind: SocketAddr,
    /// Interval for rule groups posted without one.
    pub default_group_interval_secs: u64,
    /// Deadline for proxied backend calls.
    pub proxy_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3100)),
            default_group_interval_secs: 60,
            proxy_timeout_secs: 30,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Shortest accepted rule interval; also the interval base.
    pub min_interval_secs: u64,
    /// Evaluations running at once across all rules.
    pub max_concurrent_evaluations: usize,
    /// Deadline for one evaluation.
    pub evaluation_timeout_secs: u64,
    /// How often loops are reconciled with the rule store.
    pub resync_interval_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            min_interval_secs: 10,
            max_concurrent_evaluations: 64,
            evaluation_timeout_secs: 30,
            resync_interval_secs: 60,
        }
    }
}

/// Alert instance settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    /// Minimum time between notifications of a still-firing instance.
    pub resend_delay_secs: u64,
    /// How long stale instances are kept.
    pub retention_secs: u64,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            resend_delay_secs: 60,
            retention_secs: 15 * 60,
        }
    }
}

/// Query service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    /// Base URL of the query service.
    pub url: String,
    /// Deadline for one query request.
    pub timeout_secs: u64,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            timeout_secs: 30,
        }
    }
}

/// An external Alertmanager.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertmanagerEntry {
    /// Name used in logs and health output.
    pub name: String,
    /// Base URL.
    pub url: String,
    /// Basic auth user.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic auth password.
    #[serde(default)]
    pub password: Option<String>,
}

impl std::fmt::Debug for AlertmanagerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertmanagerEntry")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Notification routing of one organisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgRouting {
    /// Organisation.
    pub org_id: i64,
    /// Which Alertmanagers receive the organisation's alerts.
    #[serde(default)]
    pub choice: AlertmanagersChoice,
    /// External Alertmanagers.
    #[serde(default)]
    pub alertmanagers: Vec<AlertmanagerEntry>,
}

/// Notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    /// Base URL used in generator links.
    pub external_url: String,
    /// End time given to firing alerts.
    pub alert_ttl_secs: u64,
    /// How often the local Alertmanagers are garbage collected.
    pub maintenance_interval_secs: u64,
    /// Delivery attempts per remote batch.
    pub retry_attempts: u32,
    /// Deadline for one batch to one Alertmanager, retries included.
    pub delivery_timeout_secs: u64,
    /// Choice for organisations not listed in `orgs`.
    pub default_choice: AlertmanagersChoice,
    /// Per-organisation routing.
    pub orgs: Vec<OrgRouting>,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            external_url: "http://localhost:3000".to_string(),
            alert_ttl_secs: 4 * 60,
            maintenance_interval_secs: 60,
            retry_attempts: 3,
            delivery_timeout_secs: 20,
            default_choice: AlertmanagersChoice::All,
            orgs: Vec::new(),
        }
    }
}

/// Quota settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaSection {
    /// Maximum rules per organisation. Unlimited when unset.
    pub rules_per_org: Option<u64>,
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server.
    pub server: ServerSection,
    /// Scheduler.
    pub scheduler: SchedulerSection,
    /// Alert instances.
    pub state: StateSection,
    /// Query service.
    pub query: QuerySection,
    /// Notifications.
    pub notifications: NotificationsSection,
    /// Quotas.
    pub quota: QuotaSection,
    /// Datasources available as recipients.
    pub datasources: Vec<Datasource>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.min_interval_secs == 0 {
            return Err(ConfigError::Invalid("scheduler.min_interval_secs must be positive".into()));
        }
        if self.scheduler.max_concurrent_evaluations == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent_evaluations must be positive".into(),
            ));
        }
        if self.server.default_group_interval_secs < self.scheduler.min_interval_secs {
            return Err(ConfigError::Invalid(
                "server.default_group_interval_secs is below scheduler.min_interval_secs".into(),
            ));
        }
        if self.query.url.trim().is_empty() {
            return Err(ConfigError::Invalid("query.url cannot be empty".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for org in &self.notifications.orgs {
            if !seen.insert(org.org_id) {
                return Err(ConfigError::Invalid(format!(
                    "organisation {} has more than one notifications entry",
                    org.org_id
                )));
            }
            for am in &org.alertmanagers {
                if am.url.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!("alertmanager {:?} has no url", am.name)));
                }
            }
        }

        let mut uids = std::collections::HashSet::new();
        for ds in &self.datasources {
            if !uids.insert((ds.org_id, ds.uid.as_str())) {
                return Err(ConfigError::Invalid(format!("duplicate datasource {:?}", ds.uid)));
            }
        }
        Ok(())
    }

    /// Settings for the API server.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        let scheduler = self.scheduler_config();
        let limits = alerting_core::RuleLimits {
            min_interval: scheduler.min_interval,
            base_interval: scheduler.min_interval,
            ..alerting_core::RuleLimits::default()
        };
        ServerConfig::new(self.server.bind)
            .with_limits(limits)
            .with_default_group_interval(Duration::from_secs(self.server.default_group_interval_secs))
            .with_proxy(
                ProxyConfig::default().with_timeout(Duration::from_secs(self.server.proxy_timeout_secs)),
            )
    }

    /// Settings for the scheduler.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_min_interval(Duration::from_secs(self.scheduler.min_interval_secs))
            .with_max_concurrent_evaluations(self.scheduler.max_concurrent_evaluations)
            .with_evaluation_timeout(Duration::from_secs(self.scheduler.evaluation_timeout_secs))
            .with_resync_interval(Duration::from_secs(self.scheduler.resync_interval_secs))
    }

    /// Settings for the state manager.
    #[must_use]
    pub fn state_config(&self) -> StateManagerConfig {
        StateManagerConfig::default()
            .with_resend_delay(Duration::from_secs(self.state.resend_delay_secs))
            .with_retention(Duration::from_secs(self.state.retention_secs))
    }

    /// Settings for the notification router.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        let n = &self.notifications;
        RouterConfig::default()
            .with_external_url(n.external_url.clone())
            .with_alert_ttl(Duration::from_secs(n.alert_ttl_secs))
            .with_retry(RetryPolicy::default().with_max_attempts(n.retry_attempts))
            .with_delivery_timeout(Duration::from_secs(n.delivery_timeout_secs))
            .with_local(LocalSettings::default())
            .with_default_choice(n.default_choice)
    }
}

/// Sample configuration written by `alertingd init-config`.
pub const SAMPLE_CONFIG: &str = r#"# alertingd configuration

[server]
bind = "0.0.0.0:3100"
default_group_interval_secs = 60
proxy_timeout_secs = 30

[scheduler]
min_interval_secs = 10
max_concurrent_evaluations = 64
evaluation_timeout_secs = 30
resync_interval_secs = 60

[state]
resend_delay_secs = 60
retention_secs = 900

[query]
url = "http://localhost:3000"
timeout_secs = 30

[notifications]
external_url = "http://localhost:3000"
alert_ttl_secs = 240
maintenance_interval_secs = 60
retry_attempts = 3
delivery_timeout_secs = 20
default_choice = "all"

[[notifications.orgs]]
org_id = 1
choice = "all"

[[notifications.orgs.alertmanagers]]
name = "ops"
url = "http://localhost:9093"

[quota]
rules_per_org = 1000

[[datasources]]
uid = "prometheus"
type = "prometheus"
url = "http://localhost:9090"
capabilities = { ruler = true, prometheusApi = true }

[[datasources]]
uid = "alertmanager"
type = "alertmanager"
url = "http://localhost:9093"
"#;
