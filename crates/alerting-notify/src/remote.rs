//! Delivery to external Alertmanager-compatible backends.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{NotifyError, Result};
use crate::models::PostableAlert;

/// A backend that accepts alerts.
#[async_trait]
pub trait AlertSender: Send + Sync {
    /// Name used in logs and health reports.
    fn name(&self) -> &str;

    /// Sends a batch of alerts.
    async fn send(&self, alerts: &[PostableAlert]) -> Result<()>;
}

/// An external Alertmanager reached over HTTP.
#[derive(Clone)]
pub struct RemoteAlertmanager {
    name: String,
    url: String,
    client: Client,
    timeout: Duration,
    basic_auth: Option<(String, String)>,
}

impl fmt::Debug for RemoteAlertmanager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAlertmanager")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("basic_auth", &self.basic_auth.as_ref().map(|(user, _)| user))
            .finish_non_exhaustive()
    }
}

impl RemoteAlertmanager {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a sender posting to `{url}/api/v2/alerts` through a shared client.
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            url: url.into().trim_end_matches('/').to_string(),
            client,
            timeout: Self::DEFAULT_TIMEOUT,
            basic_auth: None,
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets basic-auth credentials.
    #[must_use]
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// Base URL of the backend.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn delivery_error(&self, reason: impl Into<String>) -> NotifyError {
        NotifyError::Delivery {
            backend: self.name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl AlertSender for RemoteAlertmanager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, alerts: &[PostableAlert]) -> Result<()> {
        let mut request = self
            .client
            .post(format!("{}/api/v2/alerts", self.url))
            .timeout(self.timeout)
            .json(alerts);
        if let Some((user, password)) = &self.basic_auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.delivery_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.delivery_error(format!("status {status}: {}", body.trim())));
        }

        debug!(backend = %self.name, alerts = alerts.len(), "alerts delivered");
        Ok(())
    }
}
