//! The per-rule evaluation loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SchedulerInner;
use super::delivery::Rejected;
use crate::eval::EvaluationResult;
use crate::instance::AlertInstance;
use crate::rule::{AlertRule, RuleKey};

fn period(inner: &SchedulerInner, rule: &AlertRule) -> Duration {
    rule.interval()
        .max(inner.config.min_interval)
        .max(Duration::from_secs(1))
}

fn ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Moves the ticker past boundaries that elapsed while a tick ran, so an
/// overrunning evaluation resumes on the next boundary instead of
/// starting again straight away.
fn skip_missed(ticks: &mut Interval, at: Instant, every: Duration) {
    let now = Instant::now();
    let mut next = at + every;
    if next >= now {
        return;
    }
    while next < now {
        next += every;
    }
    ticks.reset_at(next);
}

/// Runs one rule until cancelled or its definition sender is dropped.
pub(super) async fn run(
    inner: Arc<SchedulerInner>,
    key: RuleKey,
    mut definition: watch::Receiver<Arc<AlertRule>>,
    cancel: CancellationToken,
) {
    let mut current = Arc::clone(&definition.borrow_and_update());
    let mut every = period(&inner, &current);
    let mut ticks = ticker(Instant::now(), every);
    inner.health.write().entry(key.clone()).or_default();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = definition.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = Arc::clone(&definition.borrow_and_update());
                let next_every = period(&inner, &next);
                if next_every != every {
                    every = next_every;
                    ticks = ticker(Instant::now() + every, every);
                }
                current = next;
            }
            at = ticks.tick() => {
                tick(&inner, &key, Arc::clone(&current), at, every).await;
                skip_missed(&mut ticks, at, every);
            }
        }
    }

    retire(&inner, &key).await;
}

async fn tick(
    inner: &Arc<SchedulerInner>,
    key: &RuleKey,
    rule: Arc<AlertRule>,
    at: Instant,
    every: Duration,
) {
    let now = inner.clock.at(at);
    let permit = match tokio::time::timeout(every, Arc::clone(&inner.permits).acquire_owned()).await {
        Ok(Ok(permit)) => permit,
        Ok(Err(_)) => return,
        Err(_) => {
            warn!(rule_uid = %key.uid, org_id = key.org_id, "no evaluation slot available, tick dropped");
            inner
                .health
                .write()
                .entry(key.clone())
                .or_default()
                .dropped_ticks += 1;
            return;
        }
    };

    let task_inner = Arc::clone(inner);
    let task_key = key.clone();
    let evaluation = tokio::spawn(async move {
        evaluate(&task_inner, &task_key, &rule, now, permit).await;
    });

    if let Err(e) = evaluation.await {
        if e.is_panic() {
            error!(rule_uid = %key.uid, org_id = key.org_id, "rule evaluation panicked");
            let mut health = inner.health.write();
            let entry = health.entry(key.clone()).or_default();
            entry.panics += 1;
            entry.record_error("evaluation panicked");
        }
    }
}

/// Evaluates a rule and commits the results. The slot is released before
/// the committed instances are queued for notification.
async fn evaluate(
    inner: &SchedulerInner,
    key: &RuleKey,
    rule: &AlertRule,
    now: DateTime<Utc>,
    permit: OwnedSemaphorePermit,
) {
    let started = Instant::now();
    let results = match inner.evaluator.evaluate(rule, now).await {
        Ok(results) => results,
        Err(e) => {
            warn!(rule_uid = %key.uid, org_id = key.org_id, error = %e, "rule evaluation failed");
            vec![EvaluationResult::error(rule, now, e.to_string())]
        }
    };
    inner
        .health
        .write()
        .entry(key.clone())
        .or_default()
        .record(now, started.elapsed(), &results);

    let outcome = inner.state.process_results(rule, &results, now).await;
    drop(permit);
    match outcome {
        Ok(outcome) => queue_notification(inner, key, outcome.to_notify),
        Err(e) => inner
            .health
            .write()
            .entry(key.clone())
            .or_default()
            .record_error(e.to_string()),
    }
}

fn queue_notification(inner: &SchedulerInner, key: &RuleKey, instances: Vec<AlertInstance>) {
    if instances.is_empty() {
        return;
    }
    let count = instances.len();
    match inner.delivery.enqueue(key, instances) {
        Ok(()) => {}
        Err(Rejected::Full) => {
            warn!(rule_uid = %key.uid, org_id = key.org_id, instances = count, "notification queue full, batch dropped");
            if let Some(health) = inner.health.write().get_mut(key) {
                health.dropped_notifications += 1;
            }
        }
        Err(Rejected::Closed) => {
            debug!(rule_uid = %key.uid, org_id = key.org_id, instances = count, "scheduler stopping, batch dropped");
        }
    }
}

/// Resolves the instances of a rule whose loop ended because it was removed.
async fn retire(inner: &SchedulerInner, key: &RuleKey) {
    if inner.shutdown.is_cancelled() || inner.registry.lock().contains_key(key) {
        return;
    }
    inner.health.write().remove(key);

    match inner.state.retire_rule(key, inner.clock.now()).await {
        Ok(resolved) => queue_notification(inner, key, resolved),
        Err(e) => warn!(rule_uid = %key.uid, org_id = key.org_id, error = %e, "failed to retire rule instances"),
    }
    info!(rule_uid = %key.uid, org_id = key.org_id, "rule loop stopped");
}
