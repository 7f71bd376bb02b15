//! Backend resolution.
//!
//! Every API family is addressed through a recipient path segment: the
//! local engine answers for [`LOCAL_RECIPIENT`], any other value names a
//! datasource whose backend must support the family.

use alerting_core::{Datasource, DatasourceCache, DatasourceType};
use tracing::debug;

use crate::error::{ApiError, ApiResult};

/// Recipient naming the local engine.
pub const LOCAL_RECIPIENT: &str = "grafana";

/// The API families the router serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Alertmanager v2 API.
    Alertmanager,
    /// Prometheus rules and alerts listing.
    Prometheus,
    /// Ruler rule-group configuration.
    Ruler,
}

impl Family {
    /// True if the datasource's backend can serve this family.
    #[must_use]
    pub fn accepts(self, ds: &Datasource) -> bool {
        let prometheus_like = matches!(ds.ds_type, DatasourceType::Prometheus | DatasourceType::Loki);
        match self {
            Self::Alertmanager => {
                ds.ds_type == DatasourceType::Alertmanager || ds.capabilities.alertmanager
            }
            Self::Prometheus => prometheus_like && ds.capabilities.prometheus_api,
            Self::Ruler => prometheus_like && ds.capabilities.ruler,
        }
    }

    const fn expected(self) -> &'static str {
        match self {
            Self::Alertmanager => "alertmanager or a backend with an alertmanager",
            Self::Prometheus => "prometheus or loki with the Prometheus rules API",
            Self::Ruler => "prometheus or loki with a ruler",
        }
    }
}

/// Where a request is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// The local engine.
    Local,
    /// A remote backend behind a datasource.
    Proxy(Datasource),
}

/// One implementation of an API family per backend.
#[derive(Debug, Clone)]
pub enum Forked<L, P> {
    /// Served by the local engine.
    Local(L),
    /// Served by a proxied backend.
    Proxy(P),
}

/// Runs the same call on whichever side of a [`Forked`] is present.
macro_rules! forked {
    ($fork:expr, $api:ident => $call:expr) => {
        match $fork {
            $crate::backend::Forked::Local($api) => $call,
            $crate::backend::Forked::Proxy($api) => $call,
        }
    };
}
pub(crate) use forked;

/// Resolves a recipient to a backend. The datasource is looked up once.
///
/// # Errors
///
/// Returns `NotFound` for unknown datasources and
/// [`ApiError::UnexpectedBackend`] when the backend cannot serve `family`.
pub async fn resolve(
    datasources: &dyn DatasourceCache,
    org_id: i64,
    recipient: &str,
    family: Family,
) -> ApiResult<Backend> {
    if recipient == LOCAL_RECIPIENT {
        return Ok(Backend::Local);
    }

    let ds = datasources.get_datasource(org_id, recipient).await?;
    if !family.accepts(&ds) {
        return Err(ApiError::UnexpectedBackend {
            uid: ds.uid,
            ds_type: ds.ds_type.to_string(),
            expected: family.expected(),
        });
    }

    debug!(org_id, datasource = %ds.uid, family = ?family, "request proxied");
    Ok(Backend::Proxy(ds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alerting_core::{AlertingError, Capabilities, MemoryDatasourceCache};
    use test_case::test_case;

    fn caps(ruler: bool, prometheus_api: bool) -> Capabilities {
        Capabilities {
            alertmanager: false,
            ruler,
            prometheus_api,
        }
    }

    fn cache() -> MemoryDatasourceCache {
        [
            Datasource::new("am", DatasourceType::Alertmanager, "http://am"),
            Datasource::new("prom", DatasourceType::Prometheus, "http://prom")
                .with_capabilities(caps(true, true)),
            Datasource::new("prom-plain", DatasourceType::Prometheus, "http://prom"),
            Datasource::new("loki", DatasourceType::Loki, "http://loki")
                .with_capabilities(caps(true, false)),
            Datasource::new("other", DatasourceType::Unsupported, "http://x"),
            Datasource::new("mimir", DatasourceType::Prometheus, "http://mimir").with_capabilities(
                Capabilities {
                    alertmanager: true,
                    ..caps(true, true)
                },
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test_case("am", Family::Alertmanager, true)]
    #[test_case("prom", Family::Alertmanager, false)]
    #[test_case("mimir", Family::Alertmanager, true ; "embedded alertmanager capability")]
    #[test_case("mimir", Family::Ruler, true)]
    #[test_case("prom", Family::Prometheus, true)]
    #[test_case("prom", Family::Ruler, true)]
    #[test_case("prom-plain", Family::Ruler, false ; "no ruler capability")]
    #[test_case("loki", Family::Ruler, true)]
    #[test_case("loki", Family::Prometheus, false ; "loki without rules api")]
    #[test_case("other", Family::Prometheus, false)]
    #[tokio::test]
    async fn capability_checks(uid: &str, family: Family, proxied: bool) {
        let result = resolve(&cache(), 1, uid, family).await;
        if proxied {
            assert!(matches!(result, Ok(Backend::Proxy(ds)) if ds.uid == uid));
        } else {
            assert!(matches!(result, Err(ApiError::UnexpectedBackend { .. })));
        }
    }

    #[tokio::test]
    async fn local_recipient_skips_lookup() {
        let result = resolve(&MemoryDatasourceCache::new(), 1, LOCAL_RECIPIENT, Family::Ruler).await;
        assert!(matches!(result, Ok(Backend::Local)));
    }

    #[tokio::test]
    async fn unknown_datasource_is_not_found() {
        let result = resolve(&cache(), 1, "missing", Family::Alertmanager).await;
        assert!(matches!(
            result,
            Err(ApiError::Alerting(AlertingError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn datasources_are_scoped_by_org() {
        let result = resolve(&cache(), 2, "am", Family::Alertmanager).await;
        assert!(result.is_err());
    }
}
