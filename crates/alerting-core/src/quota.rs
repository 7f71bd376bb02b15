//! Per-organisation quotas.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AlertingError, CapacityKind, Result};
use crate::store::RuleStore;

/// Resource a quota applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaResource {
    /// Alert rules.
    AlertRule,
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlertRule => write!(f, "alert_rule"),
        }
    }
}

/// Checks whether an organisation may create one more resource.
#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Returns `Ok(())` if one more resource fits within the quota.
    ///
    /// # Errors
    ///
    /// Returns `AlertingError::Capacity` with `CapacityKind::Quota` when the
    /// quota is exhausted.
    async fn check_quota(&self, org_id: i64, resource: QuotaResource) -> Result<()>;
}

/// Quota service that never rejects.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

#[async_trait]
impl QuotaService for Unlimited {
    async fn check_quota(&self, _org_id: i64, _resource: QuotaResource) -> Result<()> {
        Ok(())
    }
}

/// Limits the number of alert rules per organisation by counting the rule store.
pub struct RuleCountQuota {
    store: Arc<dyn RuleStore>,
    default_limit: Option<u64>,
    org_limits: HashMap<i64, u64>,
}

impl std::fmt::Debug for RuleCountQuota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCountQuota")
            .field("default_limit", &self.default_limit)
            .field("org_limits", &self.org_limits)
            .finish_non_exhaustive()
    }
}

impl RuleCountQuota {
    /// Creates a quota with an optional default limit. `None` means unlimited.
    pub fn new(store: Arc<dyn RuleStore>, default_limit: Option<u64>) -> Self {
        Self {
            store,
            default_limit,
            org_limits: HashMap::new(),
        }
    }

    /// Overrides the limit for one organisation.
    #[must_use]
    pub fn with_org_limit(mut self, org_id: i64, limit: u64) -> Self {
        self.org_limits.insert(org_id, limit);
        self
    }

    fn limit_for(&self, org_id: i64) -> Option<u64> {
        self.org_limits.get(&org_id).copied().or(self.default_limit)
    }
}

#[async_trait]
impl QuotaService for RuleCountQuota {
    async fn check_quota(&self, org_id: i64, resource: QuotaResource) -> Result<()> {
        let Some(limit) = self.limit_for(org_id) else {
            return Ok(());
        };
        let used = match resource {
            QuotaResource::AlertRule => self.store.count_rules(org_id).await?,
        };
        debug!(org_id, %resource, used, limit, "quota check");
        if used >= limit {
            return Err(AlertingError::Capacity {
                kind: CapacityKind::Quota,
                reason: format!("org {org_id} has reached its {resource} quota of {limit}"),
            });
        }
        Ok(())
    }
}
