//! Rule and instance store contracts, with in-memory implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{AlertingError, Result};
use crate::instance::{AlertInstance, InstanceKey};
use crate::labels::Fingerprint;
use crate::rule::{AlertRule, RuleKey};

/// Persistent storage for alert rules.
///
/// Writes are optimistically versioned: `upsert_rule` succeeds only if the
/// supplied `version` equals the stored one (or is 0 for a new rule), and
/// the stored copy gets `version + 1`.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Lists rules, optionally restricted to one organisation.
    async fn list_rules(&self, org_id: Option<i64>) -> Result<Vec<AlertRule>>;

    /// Fetches one rule.
    async fn get_rule(&self, key: &RuleKey) -> Result<Option<AlertRule>>;

    /// Inserts or updates a rule and returns the stored copy.
    async fn upsert_rule(&self, rule: AlertRule) -> Result<AlertRule>;

    /// Deletes a rule. Returns true if it existed.
    async fn delete_rule(&self, key: &RuleKey) -> Result<bool>;

    /// Number of rules in an organisation.
    async fn count_rules(&self, org_id: i64) -> Result<u64>;
}

/// Persistent storage for alert instances.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Lists instances, optionally restricted to one organisation.
    async fn list_instances(&self, org_id: Option<i64>) -> Result<Vec<AlertInstance>>;

    /// Writes a batch of instances atomically.
    async fn save_instances(&self, instances: &[AlertInstance]) -> Result<()>;

    /// Deletes instances.
    async fn delete_instances(&self, keys: &[InstanceKey]) -> Result<()>;
}

/// In-memory [`RuleStore`].
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<RuleKey, AlertRule>>,
}

impl MemoryRuleStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_rules(&self, org_id: Option<i64>) -> Result<Vec<AlertRule>> {
        let rules = self.rules.read();
        let mut out: Vec<AlertRule> = rules
            .values()
            .filter(|r| org_id.is_none_or(|org| r.org_id == org))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(out)
    }

    async fn get_rule(&self, key: &RuleKey) -> Result<Option<AlertRule>> {
        Ok(self.rules.read().get(key).cloned())
    }

    async fn upsert_rule(&self, mut rule: AlertRule) -> Result<AlertRule> {
        let key = rule.key();
        let mut rules = self.rules.write();
        let stored = rules.get(&key).map_or(0, |r| r.version);
        if rule.version != stored {
            return Err(AlertingError::VersionConflict {
                uid: rule.uid,
                expected: rule.version,
                actual: stored,
            });
        }
        rule.version = stored + 1;
        rule.updated = Some(Utc::now());
        rules.insert(key, rule.clone());
        Ok(rule)
    }

    async fn delete_rule(&self, key: &RuleKey) -> Result<bool> {
        Ok(self.rules.write().remove(key).is_some())
    }

    async fn count_rules(&self, org_id: i64) -> Result<u64> {
        Ok(self
            .rules
            .read()
            .keys()
            .filter(|k| k.org_id == org_id)
            .count() as u64)
    }
}

/// In-memory [`InstanceStore`].
#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    instances: RwLock<HashMap<(i64, String, Fingerprint), AlertInstance>>,
}

impl MemoryInstanceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn list_instances(&self, org_id: Option<i64>) -> Result<Vec<AlertInstance>> {
        Ok(self
            .instances
            .read()
            .values()
            .filter(|i| org_id.is_none_or(|org| i.org_id == org))
            .cloned()
            .collect())
    }

    async fn save_instances(&self, instances: &[AlertInstance]) -> Result<()> {
        let mut stored = self.instances.write();
        for inst in instances {
            stored.insert(
                (inst.org_id, inst.rule_uid.clone(), inst.fingerprint),
                inst.clone(),
            );
        }
        Ok(())
    }

    async fn delete_instances(&self, keys: &[InstanceKey]) -> Result<()> {
        let mut stored = self.instances.write();
        for key in keys {
            stored.remove(&(key.org_id, key.rule_uid.clone(), key.fingerprint));
        }
        Ok(())
    }
}
