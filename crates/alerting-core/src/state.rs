//! Alert instance state machine.
//!
//! The [`StateManager`] turns evaluation results into instance transitions:
//!
//! - firing: `Normal`/`NoData`/`Error` → `Pending` → `Alerting` once the
//!   rule's pending duration has elapsed (straight to `Alerting` when it is zero)
//! - not firing: any state → `Normal`
//! - no data and execution errors follow the rule's policies; a policy of
//!   `Alerting` goes through the pending timer like a firing result
//!
//! Transitions are written to the [`InstanceStore`] before they become
//! visible or are handed out for notification.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, error, info};

use crate::error::{AlertingError, Result};
use crate::eval::{EvalOutcome, EvaluationResult};
use crate::instance::{AlertInstance, InstanceKey, InstanceState};
use crate::labels::{Fingerprint, Labels};
use crate::retry::RetryPolicy;
use crate::rule::{AlertRule, ExecErrState, NoDataState, RuleKey};
use crate::store::InstanceStore;

/// Configuration for the state manager.
#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    /// Minimum time between two notifications of a still-firing instance.
    pub resend_delay: Duration,
    /// How long unseen or orphaned instances are kept before deletion.
    pub retention: Duration,
    /// Retry policy for instance store writes.
    pub persist_retry: RetryPolicy,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            resend_delay: Duration::from_secs(60),
            retention: Duration::from_secs(15 * 60),
            persist_retry: RetryPolicy::default(),
        }
    }
}

impl StateManagerConfig {
    /// Sets the resend delay.
    #[must_use]
    pub const fn with_resend_delay(mut self, delay: Duration) -> Self {
        self.resend_delay = delay;
        self
    }

    /// Sets the retention window.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the persistence retry policy.
    #[must_use]
    pub const fn with_persist_retry(mut self, policy: RetryPolicy) -> Self {
        self.persist_retry = policy;
        self
    }
}

/// A state change of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    /// Instance fingerprint.
    pub fingerprint: Fingerprint,
    /// Instance labels.
    pub labels: Labels,
    /// State before.
    pub from: InstanceState,
    /// State after.
    pub to: InstanceState,
    /// When the change happened.
    pub at: DateTime<Utc>,
}

/// What one call to [`StateManager::process_results`] committed.
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    /// State changes, in result order.
    pub transitions: Vec<StateTransition>,
    /// Committed instances to hand to the notification router.
    pub to_notify: Vec<AlertInstance>,
}

impl TickOutcome {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.to_notify.is_empty()
    }
}

enum Target {
    Firing,
    State(InstanceState),
    Keep,
}

fn target_for(rule: &AlertRule, outcome: &EvalOutcome) -> Target {
    match outcome {
        EvalOutcome::Normal => Target::State(InstanceState::Normal),
        EvalOutcome::Firing => Target::Firing,
        EvalOutcome::NoData => match rule.no_data_state {
            NoDataState::Alerting => Target::Firing,
            NoDataState::NoData => Target::State(InstanceState::NoData),
            NoDataState::Ok => Target::State(InstanceState::Normal),
            NoDataState::KeepLast => Target::Keep,
        },
        EvalOutcome::Error(_) => match rule.exec_err_state {
            ExecErrState::Alerting => Target::Firing,
            ExecErrState::Error => Target::State(InstanceState::Error),
            ExecErrState::Ok => Target::State(InstanceState::Normal),
            ExecErrState::KeepLast => Target::Keep,
        },
    }
}

fn apply(instance: &mut AlertInstance, target: &Target, pending_for: Duration, at: DateTime<Utc>) {
    match target {
        Target::Firing => match instance.current_state {
            InstanceState::Alerting => {}
            InstanceState::Pending => {
                let waited = (at - instance.state_since).to_std().unwrap_or_default();
                if waited >= pending_for {
                    instance.set_state(InstanceState::Alerting, at);
                }
            }
            _ if pending_for.is_zero() => {
                instance.set_state(InstanceState::Alerting, at);
            }
            _ => {
                instance.set_state(InstanceState::Pending, at);
            }
        },
        Target::State(state) => {
            instance.set_state(*state, at);
        }
        Target::Keep => {}
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

type RuleInstances = HashMap<Fingerprint, AlertInstance>;

/// Tracks alert instances and their transitions.
pub struct StateManager {
    config: StateManagerConfig,
    store: Arc<dyn InstanceStore>,
    cache: RwLock<HashMap<RuleKey, RuleInstances>>,
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("config", &self.config)
            .field("rules", &self.cache.read().len())
            .finish_non_exhaustive()
    }
}

impl StateManager {
    /// Creates a state manager backed by the given store.
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self::with_config(store, StateManagerConfig::default())
    }

    /// Creates a state manager with custom configuration.
    pub fn with_config(store: Arc<dyn InstanceStore>, config: StateManagerConfig) -> Self {
        Self {
            config,
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &StateManagerConfig {
        &self.config
    }

    /// Loads every stored instance into the cache. Returns the number loaded.
    pub async fn warm(&self) -> Result<usize> {
        let instances = self.store.list_instances(None).await?;
        let count = instances.len();
        let mut cache = self.cache.write();
        cache.clear();
        for inst in instances {
            cache
                .entry(RuleKey::new(inst.org_id, inst.rule_uid.clone()))
                .or_default()
                .insert(inst.fingerprint, inst);
        }
        info!(instances = count, rules = cache.len(), "state cache warmed");
        Ok(count)
    }

    /// Instances currently firing, for replay to the notification router.
    #[must_use]
    pub fn unresolved(&self) -> Vec<AlertInstance> {
        self.cache
            .read()
            .values()
            .flat_map(HashMap::values)
            .filter(|i| i.is_alerting())
            .cloned()
            .collect()
    }

    /// Instances of one rule, ordered by fingerprint.
    #[must_use]
    pub fn get_instances(&self, org_id: i64, rule_uid: &str) -> Vec<AlertInstance> {
        let mut out: Vec<_> = self
            .cache
            .read()
            .get(&RuleKey::new(org_id, rule_uid))
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|i| i.fingerprint);
        out
    }

    /// Instances of every rule in an organisation.
    #[must_use]
    pub fn list_instances(&self, org_id: i64) -> Vec<AlertInstance> {
        let mut out: Vec<_> = self
            .cache
            .read()
            .iter()
            .filter(|(k, _)| k.org_id == org_id)
            .flat_map(|(_, m)| m.values().cloned())
            .collect();
        out.sort_by(|a, b| (&a.rule_uid, a.fingerprint).cmp(&(&b.rule_uid, b.fingerprint)));
        out
    }

    /// Applies one tick's results for a rule.
    ///
    /// Results at or before an instance's last evaluation time are ignored.
    /// Changes are persisted before they are committed to the cache; if the
    /// store keeps failing the tick is discarded and a persistence error is
    /// returned.
    pub async fn process_results(
        &self,
        rule: &AlertRule,
        results: &[EvaluationResult],
        now: DateTime<Utc>,
    ) -> Result<TickOutcome> {
        let key = rule.key();
        let mut instances = self.cache.read().get(&key).cloned().unwrap_or_default();

        let last_tick = instances.values().map(|i| i.last_evaluation_time).max();
        let Some(tick_at) = results.iter().map(|r| r.evaluated_at).max() else {
            return Ok(TickOutcome::default());
        };
        if last_tick.is_some_and(|last| tick_at <= last) {
            debug!(rule_uid = %rule.uid, org_id = rule.org_id, "stale results ignored");
            return Ok(TickOutcome::default());
        }

        let pending_for = rule.for_duration();
        let mut touched: HashSet<Fingerprint> = HashSet::new();
        let mut transitions = Vec::new();

        // A label-less NoData/Error result speaks for every known instance.
        let rule_wide = results.len() == 1
            && results[0].labels.is_empty()
            && matches!(results[0].outcome, EvalOutcome::NoData | EvalOutcome::Error(_))
            && !instances.is_empty();

        let mut targets: Vec<(Fingerprint, &EvaluationResult)> = Vec::new();
        if rule_wide {
            targets.extend(instances.keys().map(|fp| (*fp, &results[0])));
        } else {
            for result in results {
                let labels = AlertInstance::instance_labels(rule, &result.labels);
                let fp = labels.fingerprint();
                instances
                    .entry(fp)
                    .or_insert_with(|| AlertInstance::new(rule, labels, result.evaluated_at));
                targets.push((fp, result));
            }
        }

        for (fp, result) in targets {
            let Some(inst) = instances.get_mut(&fp) else {
                continue;
            };
            if result.evaluated_at <= inst.last_evaluation_time {
                continue;
            }
            let before = inst.current_state;
            apply(inst, &target_for(rule, &result.outcome), pending_for, result.evaluated_at);
            inst.last_evaluation_time = result.evaluated_at;
            inst.last_values.clone_from(&result.values);
            inst.last_error = result.error_message().map(str::to_string);
            inst.rule_title.clone_from(&rule.title);
            inst.annotations.clone_from(&rule.annotations);
            inst.orphaned_at = None;
            touched.insert(fp);
            if inst.current_state != before {
                transitions.push(StateTransition {
                    fingerprint: fp,
                    labels: inst.labels.clone(),
                    from: before,
                    to: inst.current_state,
                    at: result.evaluated_at,
                });
            }
        }

        // Label sets missing from this tick resolve, and go away after the retention window.
        let mut deleted = Vec::new();
        for (fp, inst) in &mut instances {
            if touched.contains(fp) {
                continue;
            }
            if inst.current_state.is_active() {
                let before = inst.current_state;
                inst.set_state(InstanceState::Normal, tick_at);
                inst.last_error = None;
                touched.insert(*fp);
                transitions.push(StateTransition {
                    fingerprint: *fp,
                    labels: inst.labels.clone(),
                    from: before,
                    to: InstanceState::Normal,
                    at: tick_at,
                });
            } else if elapsed(inst.last_evaluation_time, now) > self.config.retention {
                deleted.push(*fp);
            }
        }

        let started_firing: HashSet<Fingerprint> = transitions
            .iter()
            .filter(|t| t.to == InstanceState::Alerting)
            .map(|t| t.fingerprint)
            .collect();
        let stopped_firing: HashSet<Fingerprint> = transitions
            .iter()
            .filter(|t| t.from == InstanceState::Alerting)
            .map(|t| t.fingerprint)
            .collect();

        let mut to_notify = Vec::new();
        for fp in &touched {
            let Some(inst) = instances.get_mut(fp) else {
                continue;
            };
            if inst.is_alerting() {
                let due = started_firing.contains(fp)
                    || inst
                        .last_sent_at
                        .is_none_or(|sent| elapsed(sent, now) >= self.config.resend_delay);
                if due {
                    inst.last_sent_at = Some(now);
                    to_notify.push(inst.clone());
                }
            } else if stopped_firing.contains(fp) {
                to_notify.push(inst.clone());
            }
        }

        let changed: Vec<AlertInstance> = touched
            .iter()
            .filter_map(|fp| instances.get(fp).cloned())
            .collect();
        let deleted_keys: Vec<InstanceKey> = deleted
            .iter()
            .filter_map(|fp| instances.get(fp).map(AlertInstance::key))
            .collect();

        if let Err(e) = self.persist(&changed, &deleted_keys).await {
            error!(
                rule_uid = %rule.uid,
                org_id = rule.org_id,
                error = %e,
                "failed to persist instance state, tick discarded"
            );
            return Err(e);
        }

        for fp in &deleted {
            instances.remove(fp);
        }
        self.cache.write().insert(key, instances);

        for t in &transitions {
            debug!(
                rule_uid = %rule.uid,
                org_id = rule.org_id,
                fingerprint = %t.fingerprint,
                from = %t.from,
                to = %t.to,
                "instance transition"
            );
        }
        to_notify.sort_by_key(|i| i.fingerprint);
        Ok(TickOutcome {
            transitions,
            to_notify,
        })
    }

    /// Resolves every instance of a removed rule and marks it orphaned.
    ///
    /// Returns the instances that stopped firing, for notification.
    pub async fn retire_rule(&self, key: &RuleKey, now: DateTime<Utc>) -> Result<Vec<AlertInstance>> {
        let Some(mut instances) = self.cache.read().get(key).cloned() else {
            return Ok(Vec::new());
        };

        let mut resolved = Vec::new();
        for inst in instances.values_mut() {
            let was_alerting = inst.is_alerting();
            inst.set_state(InstanceState::Normal, now);
            inst.orphaned_at = Some(now);
            if was_alerting {
                resolved.push(inst.clone());
            }
        }

        let changed: Vec<_> = instances.values().cloned().collect();
        self.persist(&changed, &[]).await?;
        self.cache.write().insert(key.clone(), instances);

        info!(
            rule_uid = %key.uid,
            org_id = key.org_id,
            resolved = resolved.len(),
            "rule retired, instances orphaned"
        );
        Ok(resolved)
    }

    /// Deletes orphaned and long-unseen instances past the retention window.
    ///
    /// Returns the number of deleted instances.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        let retention = self.config.retention;
        let expired: Vec<InstanceKey> = self
            .cache
            .read()
            .values()
            .flat_map(HashMap::values)
            .filter(|i| {
                let orphan_expired = i
                    .orphaned_at
                    .is_some_and(|at| elapsed(at, now) > retention);
                let unseen_expired = !i.current_state.is_active()
                    && elapsed(i.last_evaluation_time, now) > retention;
                orphan_expired || unseen_expired
            })
            .map(AlertInstance::key)
            .collect();

        if expired.is_empty() {
            return Ok(0);
        }
        self.persist(&[], &expired).await?;

        let mut cache = self.cache.write();
        for key in &expired {
            let rule_key = RuleKey::new(key.org_id, key.rule_uid.clone());
            if let Some(map) = cache.get_mut(&rule_key) {
                map.remove(&key.fingerprint);
                if map.is_empty() {
                    cache.remove(&rule_key);
                }
            }
        }
        debug!(deleted = expired.len(), "expired instances cleaned up");
        Ok(expired.len())
    }

    async fn persist(&self, changed: &[AlertInstance], deleted: &[InstanceKey]) -> Result<()> {
        let policy = self.config.persist_retry;
        if !changed.is_empty() {
            policy
                .run("save_instances", || self.store.save_instances(changed))
                .await
                .map_err(|e| AlertingError::persistence(e.to_string()))?;
        }
        if !deleted.is_empty() {
            policy
                .run("delete_instances", || self.store.delete_instances(deleted))
                .await
                .map_err(|e| AlertingError::persistence(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvaluationResult;
    use crate::rule::{AlertQuery, ComparisonOperator, Condition};
    use crate::store::MemoryInstanceStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn rule(for_secs: u64) -> AlertRule {
        AlertRule::builder(
            "r1",
            "HighCPU",
            Condition::new("A", ComparisonOperator::GreaterThan, 80.0),
        )
        .query(AlertQuery::new("A", "prom", serde_json::json!({})))
        .interval(Duration::from_secs(10))
        .for_duration(Duration::from_secs(for_secs))
        .build()
        .expect("valid rule")
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
    }

    fn result(labels: &Labels, at: DateTime<Utc>, outcome: EvalOutcome) -> EvaluationResult {
        EvaluationResult {
            rule_uid: "r1".to_string(),
            labels: labels.clone(),
            evaluated_at: at,
            values: BTreeMap::new(),
            outcome,
            evaluation_duration: Duration::ZERO,
        }
    }

    fn host(name: &str) -> Labels {
        Labels::new().with("host", name)
    }

    fn manager() -> (StateManager, Arc<MemoryInstanceStore>) {
        let store = Arc::new(MemoryInstanceStore::new());
        (StateManager::new(store.clone()), store)
    }

    async fn tick(sm: &StateManager, rule: &AlertRule, at: DateTime<Utc>, outcome: EvalOutcome) -> TickOutcome {
        sm.process_results(rule, &[result(&host("a"), at, outcome)], at)
            .await
            .expect("process")
    }

    fn state_of(sm: &StateManager) -> InstanceState {
        sm.get_instances(1, "r1")
            .first()
            .map(|i| i.current_state)
            .expect("instance exists")
    }

    mod lifecycle_tests {
        use super::*;

        #[tokio::test]
        async fn pending_then_alerting_after_for() {
            let (sm, _) = manager();
            let rule = rule(30);
            let mut states = Vec::new();
            for secs in [0, 10, 20, 30] {
                tick(&sm, &rule, t(secs), EvalOutcome::Firing).await;
                states.push(state_of(&sm));
            }
            assert_eq!(
                states,
                vec![
                    InstanceState::Pending,
                    InstanceState::Pending,
                    InstanceState::Pending,
                    InstanceState::Alerting
                ]
            );
        }

        #[tokio::test]
        async fn fire_then_stop_returns_to_normal() {
            let (sm, _) = manager();
            let rule = rule(30);
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            assert_eq!(state_of(&sm), InstanceState::Pending);
            let out = tick(&sm, &rule, t(10), EvalOutcome::Normal).await;
            assert_eq!(state_of(&sm), InstanceState::Normal);
            assert!(out.to_notify.is_empty());
            assert_eq!(out.transitions.len(), 1);
        }

        #[tokio::test]
        async fn zero_for_alerts_immediately_and_notifies() {
            let (sm, _) = manager();
            let rule = rule(0);
            let out = tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            assert_eq!(state_of(&sm), InstanceState::Alerting);
            assert_eq!(out.to_notify.len(), 1);
            assert_eq!(out.to_notify[0].last_sent_at, Some(t(0)));
        }

        #[tokio::test]
        async fn resolution_is_notified_once() {
            let (sm, _) = manager();
            let rule = rule(0);
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            let out = tick(&sm, &rule, t(10), EvalOutcome::Normal).await;
            assert_eq!(out.to_notify.len(), 1);
            assert_eq!(out.to_notify[0].resolved_at, Some(t(10)));
            let out = tick(&sm, &rule, t(20), EvalOutcome::Normal).await;
            assert!(out.to_notify.is_empty());
        }

        #[tokio::test]
        async fn resend_respects_delay() {
            let (sm, _) = manager();
            let rule = rule(0);
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            let out = tick(&sm, &rule, t(30), EvalOutcome::Firing).await;
            assert!(out.to_notify.is_empty());
            let out = tick(&sm, &rule, t(60), EvalOutcome::Firing).await;
            assert_eq!(out.to_notify.len(), 1);
        }

        #[tokio::test]
        async fn replayed_results_are_ignored() {
            let (sm, store) = manager();
            let rule = rule(0);
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            let before = sm.get_instances(1, "r1");

            let out = tick(&sm, &rule, t(0), EvalOutcome::Normal).await;
            assert!(out.is_empty());
            assert_eq!(sm.get_instances(1, "r1"), before);
            assert_eq!(store.list_instances(Some(1)).await.expect("list"), before);
        }

        #[tokio::test]
        async fn missing_label_set_resolves() {
            let (sm, _) = manager();
            let rule = rule(0);
            sm.process_results(
                &rule,
                &[
                    result(&host("a"), t(0), EvalOutcome::Firing),
                    result(&host("b"), t(0), EvalOutcome::Firing),
                ],
                t(0),
            )
            .await
            .expect("process");

            let out = sm
                .process_results(&rule, &[result(&host("a"), t(10), EvalOutcome::Firing)], t(10))
                .await
                .expect("process");
            assert_eq!(out.transitions.len(), 1);
            assert_eq!(out.transitions[0].labels.get("host"), Some("b"));
            assert_eq!(out.transitions[0].to, InstanceState::Normal);
            assert_eq!(out.to_notify.len(), 1);
        }

        #[tokio::test]
        async fn instance_labels_carry_rule_identity() {
            let (sm, _) = manager();
            tick(&sm, &rule(0), t(0), EvalOutcome::Firing).await;
            let inst = &sm.get_instances(1, "r1")[0];
            assert_eq!(inst.labels.get(crate::labels::ALERTNAME), Some("HighCPU"));
            assert_eq!(inst.labels.get(crate::labels::RULE_UID), Some("r1"));
            assert_eq!(inst.fingerprint, inst.labels.fingerprint());
        }
    }

    mod policy_tests {
        use super::*;

        #[tokio::test]
        async fn no_data_default_moves_to_no_data() {
            let (sm, _) = manager();
            let rule = rule(30);
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            let out = sm
                .process_results(&rule, &[EvaluationResult::no_data(&rule, t(10))], t(10))
                .await
                .expect("process");
            assert_eq!(state_of(&sm), InstanceState::NoData);
            assert_eq!(out.transitions[0].from, InstanceState::Pending);
        }

        #[tokio::test]
        async fn alerting_policy_uses_pending_timer() {
            let (sm, _) = manager();
            let rule = AlertRule {
                exec_err_state: ExecErrState::Alerting,
                ..rule(20)
            };
            for (secs, expected) in [
                (0, InstanceState::Pending),
                (10, InstanceState::Pending),
                (20, InstanceState::Alerting),
            ] {
                tick(&sm, &rule, t(secs), EvalOutcome::Error("timeout".to_string())).await;
                assert_eq!(state_of(&sm), expected);
            }
        }

        #[tokio::test]
        async fn firing_and_alerting_policy_share_timer() {
            let (sm, _) = manager();
            let rule = AlertRule {
                no_data_state: NoDataState::Alerting,
                ..rule(20)
            };
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            tick(&sm, &rule, t(10), EvalOutcome::NoData).await;
            tick(&sm, &rule, t(20), EvalOutcome::Firing).await;
            assert_eq!(state_of(&sm), InstanceState::Alerting);
        }

        #[tokio::test]
        async fn keep_last_leaves_state_and_timer() {
            let (sm, _) = manager();
            let rule = AlertRule {
                exec_err_state: ExecErrState::KeepLast,
                ..rule(30)
            };
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            tick(&sm, &rule, t(10), EvalOutcome::Error("boom".to_string())).await;
            let inst = &sm.get_instances(1, "r1")[0];
            assert_eq!(inst.current_state, InstanceState::Pending);
            assert_eq!(inst.state_since, t(0));
            assert_eq!(inst.last_error.as_deref(), Some("boom"));
        }

        #[tokio::test]
        async fn ok_policy_means_normal() {
            let (sm, _) = manager();
            let rule = AlertRule {
                no_data_state: NoDataState::Ok,
                ..rule(0)
            };
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            tick(&sm, &rule, t(10), EvalOutcome::NoData).await;
            assert_eq!(state_of(&sm), InstanceState::Normal);
        }

        #[tokio::test]
        async fn rule_wide_error_applies_to_all_instances() {
            let (sm, _) = manager();
            let rule = rule(0);
            sm.process_results(
                &rule,
                &[
                    result(&host("a"), t(0), EvalOutcome::Firing),
                    result(&host("b"), t(0), EvalOutcome::Normal),
                ],
                t(0),
            )
            .await
            .expect("process");

            sm.process_results(&rule, &[EvaluationResult::error(&rule, t(10), "down")], t(10))
                .await
                .expect("process");
            let states: Vec<_> = sm
                .get_instances(1, "r1")
                .iter()
                .map(|i| i.current_state)
                .collect();
            assert_eq!(states, vec![InstanceState::Error, InstanceState::Error]);
        }
    }

    mod persistence_tests {
        use super::*;

        struct FlakyStore {
            fail: AtomicBool,
            inner: MemoryInstanceStore,
        }

        #[async_trait]
        impl InstanceStore for FlakyStore {
            async fn list_instances(&self, org_id: Option<i64>) -> Result<Vec<AlertInstance>> {
                self.inner.list_instances(org_id).await
            }

            async fn save_instances(&self, instances: &[AlertInstance]) -> Result<()> {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(AlertingError::persistence("disk unavailable"));
                }
                self.inner.save_instances(instances).await
            }

            async fn delete_instances(&self, keys: &[InstanceKey]) -> Result<()> {
                self.inner.delete_instances(keys).await
            }
        }

        #[tokio::test(start_paused = true)]
        async fn failed_persist_discards_tick() {
            let store = Arc::new(FlakyStore {
                fail: AtomicBool::new(false),
                inner: MemoryInstanceStore::new(),
            });
            let sm = StateManager::new(store.clone());
            let rule = rule(0);
            tick(&sm, &rule, t(0), EvalOutcome::Normal).await;

            store.fail.store(true, Ordering::SeqCst);
            let err = sm
                .process_results(&rule, &[result(&host("a"), t(10), EvalOutcome::Firing)], t(10))
                .await
                .expect_err("persist fails");
            assert!(matches!(err, AlertingError::Persistence { .. }));
            assert_eq!(state_of(&sm), InstanceState::Normal);

            store.fail.store(false, Ordering::SeqCst);
            let out = tick(&sm, &rule, t(20), EvalOutcome::Firing).await;
            assert_eq!(state_of(&sm), InstanceState::Alerting);
            assert_eq!(out.to_notify.len(), 1);
        }

        #[tokio::test]
        async fn warm_restores_and_replays() {
            let (sm, store) = manager();
            tick(&sm, &rule(0), t(0), EvalOutcome::Firing).await;

            let restarted = StateManager::new(store);
            assert_eq!(restarted.warm().await.expect("warm"), 1);
            let unresolved = restarted.unresolved();
            assert_eq!(unresolved.len(), 1);
            assert!(unresolved[0].is_alerting());
        }
    }

    mod retirement_tests {
        use super::*;

        #[tokio::test]
        async fn retire_resolves_and_orphans() {
            let (sm, _) = manager();
            let rule = rule(0);
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;

            let resolved = sm.retire_rule(&rule.key(), t(5)).await.expect("retire");
            assert_eq!(resolved.len(), 1);
            let inst = &sm.get_instances(1, "r1")[0];
            assert_eq!(inst.current_state, InstanceState::Normal);
            assert_eq!(inst.orphaned_at, Some(t(5)));
        }

        #[tokio::test]
        async fn cleanup_removes_expired_orphans() {
            let store = Arc::new(MemoryInstanceStore::new());
            let sm = StateManager::with_config(
                store.clone(),
                StateManagerConfig::default().with_retention(Duration::from_secs(60)),
            );
            let rule = rule(0);
            tick(&sm, &rule, t(0), EvalOutcome::Firing).await;
            sm.retire_rule(&rule.key(), t(5)).await.expect("retire");

            assert_eq!(sm.cleanup(t(30)).await.expect("cleanup"), 0);
            assert_eq!(sm.cleanup(t(120)).await.expect("cleanup"), 1);
            assert!(sm.list_instances(1).is_empty());
            assert!(store.is_empty());
        }

        #[tokio::test]
        async fn retire_unknown_rule_is_noop() {
            let (sm, _) = manager();
            let resolved = sm
                .retire_rule(&RuleKey::new(1, "missing"), t(0))
                .await
                .expect("retire");
            assert!(resolved.is_empty());
        }
    }
}
