//! Rule evaluation scheduler.
//!
//! Every registered rule gets its own task that ticks at the rule's
//! interval. Definitions reach the task through a watch channel, so an
//! update takes effect on the next tick while an in-flight evaluation
//! finishes with the definition it started with. A global semaphore
//! bounds concurrent evaluations. Committed instances are queued for a
//! notification worker; rule loops never wait on delivery.

mod clock;
mod delivery;
mod health;
mod rule_loop;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use clock::Clock;
pub use health::{Health, RuleHealth};

use crate::error::{AlertingError, Result};
use crate::eval::Evaluator;
use crate::instance::AlertInstance;
use crate::rule::{AlertRule, RuleKey};
use crate::state::StateManager;
use crate::store::RuleStore;

use self::delivery::Delivery;

/// Receives committed instances that need to be (re)sent or resolved.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// Hands instances of one organisation to the notification pipeline.
    async fn notify(&self, org_id: i64, instances: &[AlertInstance]) -> Result<()>;
}

/// Notifier that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl AlertNotifier for NoopNotifier {
    async fn notify(&self, _org_id: i64, _instances: &[AlertInstance]) -> Result<()> {
        Ok(())
    }
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Shortest interval a rule loop will tick at.
    pub min_interval: Duration,
    /// Maximum evaluations running at once across all rules.
    pub max_concurrent_evaluations: usize,
    /// How often the registry is reconciled with the rule store.
    pub resync_interval: Duration,
    /// Deadline for one rule evaluation.
    pub evaluation_timeout: Duration,
    /// Deadline for handing one batch of instances to the notifier.
    pub notification_timeout: Duration,
    /// Batches that may wait for the notifier before new ones are dropped.
    pub notification_queue: usize,
    /// How long shutdown waits for loops to finish.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(10),
            max_concurrent_evaluations: 64,
            resync_interval: Duration::from_secs(60),
            evaluation_timeout: Duration::from_secs(30),
            notification_timeout: Duration::from_secs(30),
            notification_queue: 1024,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    /// Sets the minimum interval.
    #[must_use]
    pub const fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub const fn with_max_concurrent_evaluations(mut self, max: usize) -> Self {
        self.max_concurrent_evaluations = max;
        self
    }

    /// Sets the resync interval.
    #[must_use]
    pub const fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Sets the evaluation timeout.
    #[must_use]
    pub const fn with_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    /// Sets the notification timeout.
    #[must_use]
    pub const fn with_notification_timeout(mut self, timeout: Duration) -> Self {
        self.notification_timeout = timeout;
        self
    }

    /// Sets the notification queue capacity.
    #[must_use]
    pub const fn with_notification_queue(mut self, capacity: usize) -> Self {
        self.notification_queue = capacity;
        self
    }

    /// Sets the shutdown grace period.
    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

struct RuleHandle {
    definition: watch::Sender<Arc<AlertRule>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub(crate) struct SchedulerInner {
    config: SchedulerConfig,
    evaluator: Evaluator,
    state: Arc<StateManager>,
    notifier: Arc<dyn AlertNotifier>,
    delivery: Delivery,
    store: Arc<dyn RuleStore>,
    clock: Clock,
    registry: Mutex<HashMap<RuleKey, RuleHandle>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    health: RwLock<HashMap<RuleKey, RuleHealth>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

/// Schedules one evaluation loop per rule.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("rules", &self.inner.registry.lock().len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// The evaluator's timeout is replaced by `config.evaluation_timeout`.
    pub fn new(
        config: SchedulerConfig,
        evaluator: Evaluator,
        state: Arc<StateManager>,
        notifier: Arc<dyn AlertNotifier>,
        store: Arc<dyn RuleStore>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_evaluations.max(1)));
        Self {
            inner: Arc::new(SchedulerInner {
                evaluator: evaluator.with_timeout(config.evaluation_timeout),
                delivery: Delivery::new(config.notification_queue),
                config,
                state,
                notifier,
                store,
                clock: Clock::new(),
                registry: Mutex::new(HashMap::new()),
                retired: Mutex::new(Vec::new()),
                health: RwLock::new(HashMap::new()),
                permits,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// The state manager fed by this scheduler.
    #[must_use]
    pub fn state(&self) -> &Arc<StateManager> {
        &self.inner.state
    }

    /// The evaluator used by rule loops.
    #[must_use]
    pub fn evaluator(&self) -> &Evaluator {
        &self.inner.evaluator
    }

    /// The clock rule loops read evaluation times from.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Starts or updates the loop of a rule.
    ///
    /// An unchanged definition is a no-op. A changed one is picked up on the
    /// loop's next tick.
    ///
    /// # Errors
    ///
    /// Returns `AlertingError::SchedulerStopped` after shutdown.
    pub fn add_or_update_rule(&self, rule: AlertRule) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(AlertingError::SchedulerStopped);
        }
        let key = rule.key();
        let mut registry = self.inner.registry.lock();

        if let Some(handle) = registry.get(&key) {
            if !handle.task.is_finished() {
                if **handle.definition.borrow() == rule {
                    return Ok(());
                }
                debug!(rule_uid = %key.uid, org_id = key.org_id, version = rule.version, "rule definition updated");
                handle.definition.send_replace(Arc::new(rule));
                return Ok(());
            }
            warn!(rule_uid = %key.uid, org_id = key.org_id, "rule loop exited unexpectedly, restarting");
        }

        let handle = self.spawn_loop(key.clone(), rule);
        registry.insert(key.clone(), handle);
        info!(rule_uid = %key.uid, org_id = key.org_id, "rule scheduled");
        Ok(())
    }

    /// Stops the loop of a rule. Its instances are resolved once the loop
    /// finishes its current tick.
    ///
    /// Returns true if the rule was scheduled.
    pub fn remove_rule(&self, key: &RuleKey) -> bool {
        let Some(handle) = self.inner.registry.lock().remove(key) else {
            return false;
        };
        handle.cancel.cancel();
        let mut retired = self.inner.retired.lock();
        retired.retain(|t| !t.is_finished());
        retired.push(handle.task);
        info!(rule_uid = %key.uid, org_id = key.org_id, "rule unscheduled");
        true
    }

    /// Keys of all scheduled rules, sorted.
    #[must_use]
    pub fn scheduled_rules(&self) -> Vec<RuleKey> {
        let mut keys: Vec<_> = self.inner.registry.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns true if the rule has a loop.
    #[must_use]
    pub fn is_scheduled(&self, key: &RuleKey) -> bool {
        self.inner.registry.lock().contains_key(key)
    }

    /// Health of a scheduled rule.
    #[must_use]
    pub fn rule_health(&self, key: &RuleKey) -> Option<RuleHealth> {
        self.inner.health.read().get(key).cloned()
    }

    /// Reconciles the running loops with the rule store.
    ///
    /// Returns the number of scheduled rules afterwards.
    pub async fn resync(&self) -> Result<usize> {
        let rules = self.inner.store.list_rules(None).await?;
        let desired: HashSet<RuleKey> = rules.iter().map(AlertRule::key).collect();

        for rule in rules {
            self.add_or_update_rule(rule)?;
        }
        let stale: Vec<RuleKey> = self
            .inner
            .registry
            .lock()
            .keys()
            .filter(|k| !desired.contains(k))
            .cloned()
            .collect();
        for key in &stale {
            self.remove_rule(key);
        }

        let scheduled = self.inner.registry.lock().len();
        debug!(scheduled, removed = stale.len(), "scheduler resynced");
        Ok(scheduled)
    }

    /// Runs the scheduler until `shutdown` fires or [`Scheduler::shutdown`] is called.
    ///
    /// Warms the state cache, replays firing instances to the notifier,
    /// loads rules from the store and then resyncs periodically. On exit
    /// waits up to the grace period for loops to finish.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let inner = &self.inner;
        inner.state.warm().await?;
        self.start_delivery();
        self.replay_unresolved().await;
        let scheduled = self.resync().await?;
        info!(scheduled, "scheduler started");

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + inner.config.resync_interval,
            inner.config.resync_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.resync().await {
                        warn!(error = %e, "rule resync failed");
                    }
                    if let Err(e) = inner.state.cleanup(inner.clock.now()).await {
                        warn!(error = %e, "instance cleanup failed");
                    }
                }
            }
        }

        self.shutdown();
        self.drain().await;
        Ok(())
    }

    /// Signals every loop to stop. New rules are rejected afterwards.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    async fn replay_unresolved(&self) {
        let mut by_org: HashMap<i64, Vec<AlertInstance>> = HashMap::new();
        for inst in self.inner.state.unresolved() {
            by_org.entry(inst.org_id).or_default().push(inst);
        }
        for (org_id, instances) in by_org {
            info!(org_id, instances = instances.len(), "replaying firing instances");
            if let Err(e) = self.inner.notifier.notify(org_id, &instances).await {
                warn!(org_id, error = %e, "failed to replay firing instances");
            }
        }
    }

    fn start_delivery(&self) {
        self.inner
            .delivery
            .start(&self.inner.notifier, self.inner.config.notification_timeout);
    }

    async fn drain(&self) {
        let mut tasks: Vec<JoinHandle<()>> = self
            .inner
            .registry
            .lock()
            .drain()
            .map(|(_, h)| h.task)
            .collect();
        tasks.append(&mut self.inner.retired.lock());

        let deadline = tokio::time::Instant::now() + self.inner.config.shutdown_grace;
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let count = tasks.len();
        if tokio::time::timeout_at(deadline, join_all(tasks))
            .await
            .is_err()
        {
            warn!(loops = count, "shutdown grace period elapsed, aborting rule loops");
            for abort in aborts {
                abort.abort();
            }
        }
        self.inner.delivery.close(deadline).await;
        info!(loops = count, "scheduler stopped");
    }

    fn spawn_loop(&self, key: RuleKey, rule: AlertRule) -> RuleHandle {
        self.start_delivery();
        let (definition, receiver) = watch::channel(Arc::new(rule));
        let cancel = self.inner.shutdown.child_token();
        let task = tokio::spawn(rule_loop::run(
            Arc::clone(&self.inner),
            key,
            receiver,
            cancel.clone(),
        ));
        RuleHandle {
            definition,
            cancel,
            task,
        }
    }
}
