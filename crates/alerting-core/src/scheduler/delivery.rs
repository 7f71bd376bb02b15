//! Notification hand-off.
//!
//! Rule loops push committed instances onto a bounded queue and move on. A
//! single worker drains the queue into the notifier, so batches reach it in
//! the order they were committed and a slow notifier never holds an
//! evaluation slot.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::AlertNotifier;
use crate::instance::AlertInstance;
use crate::rule::RuleKey;

struct Batch {
    key: RuleKey,
    instances: Vec<AlertInstance>,
}

/// Why a batch was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Rejected {
    Full,
    Closed,
}

pub(super) struct Delivery {
    queue: mpsc::Sender<Batch>,
    pending: Mutex<Option<mpsc::Receiver<Batch>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: CancellationToken,
}

impl Delivery {
    pub(super) fn new(capacity: usize) -> Self {
        let (queue, pending) = mpsc::channel(capacity.max(1));
        Self {
            queue,
            pending: Mutex::new(Some(pending)),
            worker: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Spawns the worker on first call. Must run inside a Tokio runtime.
    pub(super) fn start(&self, notifier: &Arc<dyn AlertNotifier>, timeout: Duration) {
        let Some(pending) = self.pending.lock().take() else {
            return;
        };
        let task = tokio::spawn(work(
            pending,
            Arc::clone(notifier),
            timeout,
            self.closed.clone(),
        ));
        *self.worker.lock() = Some(task);
    }

    /// Queues a batch without waiting.
    pub(super) fn enqueue(&self, key: &RuleKey, instances: Vec<AlertInstance>) -> Result<(), Rejected> {
        let batch = Batch {
            key: key.clone(),
            instances,
        };
        match self.queue.try_send(batch) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Rejected::Full),
            Err(TrySendError::Closed(_)) => Err(Rejected::Closed),
        }
    }

    /// Stops accepting batches and waits until the queued ones are
    /// delivered or `deadline` passes.
    pub(super) async fn close(&self, deadline: Instant) {
        self.closed.cancel();
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let abort = worker.abort_handle();
        if tokio::time::timeout_at(deadline, worker).await.is_err() {
            warn!("notification queue not drained before shutdown deadline");
            abort.abort();
        }
    }
}

async fn work(
    mut pending: mpsc::Receiver<Batch>,
    notifier: Arc<dyn AlertNotifier>,
    timeout: Duration,
    closed: CancellationToken,
) {
    loop {
        let batch = tokio::select! {
            biased;
            batch = pending.recv() => batch,
            () = closed.cancelled() => {
                pending.close();
                pending.recv().await
            }
        };
        let Some(batch) = batch else {
            break;
        };
        deliver(notifier.as_ref(), timeout, batch).await;
    }
    debug!("notification worker stopped");
}

async fn deliver(notifier: &dyn AlertNotifier, timeout: Duration, batch: Batch) {
    let Batch { key, instances } = batch;
    match tokio::time::timeout(timeout, notifier.notify(key.org_id, &instances)).await {
        Ok(Ok(())) => debug!(
            rule_uid = %key.uid,
            org_id = key.org_id,
            instances = instances.len(),
            "instances handed to notifier"
        ),
        Ok(Err(e)) => warn!(rule_uid = %key.uid, org_id = key.org_id, error = %e, "notification failed"),
        Err(_) => warn!(rule_uid = %key.uid, org_id = key.org_id, "notification timed out"),
    }
}
