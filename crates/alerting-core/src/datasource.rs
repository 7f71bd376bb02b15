//! Datasource descriptors and the datasource cache contract.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{AlertingError, Result};

/// Kind of backend a datasource points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceType {
    /// Prometheus, Cortex or Mimir.
    Prometheus,
    /// Loki.
    Loki,
    /// Standalone Alertmanager.
    Alertmanager,
    /// Any other type. Never a valid alerting backend.
    #[serde(other)]
    Unsupported,
}

impl DatasourceType {
    /// Returns the type as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Prometheus => "prometheus",
            Self::Loki => "loki",
            Self::Alertmanager => "alertmanager",
            Self::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for DatasourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alerting features a datasource's backend exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    /// Serves the Alertmanager v2 API.
    pub alertmanager: bool,
    /// Serves the ruler config API.
    pub ruler: bool,
    /// Serves the Prometheus rules/alerts API.
    pub prometheus_api: bool,
}

/// Basic auth credentials applied to proxied requests.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A configured datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    /// Unique identifier within the organisation.
    pub uid: String,
    /// Owning organisation.
    #[serde(default = "default_org")]
    pub org_id: i64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Backend type.
    #[serde(rename = "type")]
    pub ds_type: DatasourceType,
    /// Base URL of the backend.
    pub url: String,
    /// Supported alerting features.
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Credentials for proxied requests.
    #[serde(default)]
    pub basic_auth: Option<BasicAuth>,
    /// Extra headers added to proxied requests.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

const fn default_org() -> i64 {
    1
}

impl Datasource {
    /// Creates a datasource with no capabilities.
    pub fn new(uid: impl Into<String>, ds_type: DatasourceType, url: impl Into<String>) -> Self {
        let uid = uid.into();
        Self {
            name: uid.clone(),
            uid,
            org_id: default_org(),
            ds_type,
            url: url.into(),
            capabilities: Capabilities::default(),
            basic_auth: None,
            headers: BTreeMap::new(),
        }
    }

    /// Sets the owning organisation.
    #[must_use]
    pub const fn with_org(mut self, org_id: i64) -> Self {
        self.org_id = org_id;
        self
    }

    /// Sets the capabilities.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets basic auth credentials.
    #[must_use]
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Adds a header sent with every proxied request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Looks up datasources by organisation and UID.
#[async_trait]
pub trait DatasourceCache: Send + Sync {
    /// Fetches a datasource.
    ///
    /// # Errors
    ///
    /// Returns `AlertingError::NotFound` if no such datasource exists.
    async fn get_datasource(&self, org_id: i64, uid: &str) -> Result<Datasource>;
}

/// In-memory [`DatasourceCache`].
#[derive(Debug, Default)]
pub struct MemoryDatasourceCache {
    datasources: RwLock<HashMap<(i64, String), Datasource>>,
}

impl MemoryDatasourceCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a datasource.
    pub fn insert(&self, datasource: Datasource) {
        self.datasources
            .write()
            .insert((datasource.org_id, datasource.uid.clone()), datasource);
    }
}

impl FromIterator<Datasource> for MemoryDatasourceCache {
    fn from_iter<T: IntoIterator<Item = Datasource>>(iter: T) -> Self {
        let cache = Self::new();
        for ds in iter {
            cache.insert(ds);
        }
        cache
    }
}

#[async_trait]
impl DatasourceCache for MemoryDatasourceCache {
    async fn get_datasource(&self, org_id: i64, uid: &str) -> Result<Datasource> {
        self.datasources
            .read()
            .get(&(org_id, uid.to_string()))
            .cloned()
            .ok_or_else(|| AlertingError::not_found("datasource", uid))
    }
}
