//! Deduplicating, debouncing reconcile scheduler.
//!
//! Every trigger (watch event, retry, sweep, readiness recheck) enters through
//! [`Scheduler::schedule`]. At most one debounce timer is pending per key; a
//! second trigger while one is pending is dropped, because the reconcile that
//! eventually runs reads the latest object from the authoritative store.
//!
//! The active set tracks keys whose reconcile is running. At most one pass
//! per key is in flight: a debounce that expires while the key is active
//! does not dispatch, it marks the key for exactly one follow-up pass that
//! is scheduled when the running pass ends.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::controller::common::{ResourceKey, ResourceKind};
use crate::controller::context::ReconcileContext;
use crate::controller::error::Result;
use crate::controller::reconciler::{ReconcileOutcome, Reconciler};
use crate::controller::retry_queue::{Backoff, RetryQueue};
use crate::controller::{
    cluster_reconciler::ClusterReconciler, collection_reconciler::CollectionReconciler,
    restore_reconciler::RestoreReconciler,
};
use crate::health::QUEUE_SCHEDULER;

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

/// Output of a scheduled task: `None` when the reconcile never ran, because
/// the gate closed during the debounce or a pass for the key was still
/// running (a follow-up is queued instead).
pub type ReconcileTask = JoinHandle<Result<Option<ReconcileOutcome>>>;

/// What `schedule` did with a trigger.
#[derive(Debug)]
pub enum ScheduleOutcome {
    /// A debounce timer was armed; the handle resolves to the reconcile result.
    Scheduled(ReconcileTask),
    /// A timer for this key is already pending.
    AlreadyPending,
    /// Not leader or shutting down.
    Suppressed,
}

impl ScheduleOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, ScheduleOutcome::Scheduled(_))
    }

    /// The task handle, if one was spawned
    pub fn into_task(self) -> Option<ReconcileTask> {
        match self {
            ScheduleOutcome::Scheduled(task) => Some(task),
            _ => None,
        }
    }
}

/// The reconciler for each kind.
#[derive(Clone)]
pub struct Reconcilers {
    pub cluster: Arc<dyn Reconciler>,
    pub collection: Arc<dyn Reconciler>,
    pub restore: Arc<dyn Reconciler>,
}

impl Reconcilers {
    /// Production reconcilers sharing one context
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self {
            cluster: Arc::new(ClusterReconciler::new(ctx.clone())),
            collection: Arc::new(CollectionReconciler::new(ctx.clone())),
            restore: Arc::new(RestoreReconciler::new(ctx)),
        }
    }

    pub fn for_kind(&self, kind: ResourceKind) -> &Arc<dyn Reconciler> {
        match kind {
            ResourceKind::Cluster => &self.cluster,
            ResourceKind::Collection => &self.collection,
            ResourceKind::Restore => &self.restore,
        }
    }
}

/// Scheduler tunables
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub debounce: Duration,
    /// Backoff for reconciles that fail with an unexpected error
    pub error_backoff: Backoff,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            error_backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                cap: Duration::from_secs(300),
            },
        }
    }
}

struct SchedulerInner {
    ctx: Arc<ReconcileContext>,
    reconcilers: Reconcilers,
    config: SchedulerConfig,
    pending: Mutex<HashMap<ResourceKey, AbortHandle>>,
    active: Mutex<HashSet<ResourceKey>>,
    /// Keys triggered while their reconcile was running
    rerun: Mutex<HashSet<ResourceKey>>,
    retries: RetryQueue,
}

/// Cheap-to-clone handle to the scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a key from the active set when the reconcile ends, even by panic.
struct ActiveGuard<'a> {
    inner: &'a SchedulerInner,
    key: ResourceKey,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        lock(&self.inner.active).remove(&self.key);
        self.inner.ctx.metrics.active_reconciles.dec();
    }
}

impl Scheduler {
    pub fn new(
        ctx: Arc<ReconcileContext>,
        reconcilers: Reconcilers,
        config: SchedulerConfig,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<SchedulerInner>| {
            let weak = weak.clone();
            let retries = RetryQueue::new(
                ctx.metrics.clone(),
                Arc::new(move |key| {
                    // Retries re-enter through schedule so debounce and dedup apply.
                    if let Some(inner) = weak.upgrade() {
                        Scheduler { inner }.schedule(key);
                    }
                }),
            );
            SchedulerInner {
                ctx,
                reconcilers,
                config,
                pending: Mutex::new(HashMap::new()),
                active: Mutex::new(HashSet::new()),
                rerun: Mutex::new(HashSet::new()),
                retries,
            }
        });
        Self { inner }
    }

    /// Request a reconcile of `key` after the debounce window.
    pub fn schedule(&self, key: ResourceKey) -> ScheduleOutcome {
        if !self.inner.ctx.gate.accepting_work() {
            debug!(key = %key, "Not accepting work, dropping schedule request");
            return ScheduleOutcome::Suppressed;
        }

        let mut pending = lock(&self.inner.pending);
        if pending.contains_key(&key) {
            debug!(key = %key, "Reconcile already pending");
            return ScheduleOutcome::AlreadyPending;
        }

        let span = info_span!("reconcile", key = %key);
        let task = tokio::spawn(Self::run(self.inner.clone(), key.clone()).instrument(span));
        pending.insert(key, task.abort_handle());
        let depth = pending.len();
        drop(pending);

        self.inner
            .ctx
            .metrics
            .set_queue_depth(QUEUE_SCHEDULER, depth);
        ScheduleOutcome::Scheduled(task)
    }

    async fn run(
        inner: Arc<SchedulerInner>,
        key: ResourceKey,
    ) -> Result<Option<ReconcileOutcome>> {
        tokio::time::sleep(inner.config.debounce).await;

        let depth = {
            let mut pending = lock(&inner.pending);
            pending.remove(&key);
            pending.len()
        };
        inner.ctx.metrics.set_queue_depth(QUEUE_SCHEDULER, depth);

        if !inner.ctx.gate.accepting_work() {
            info!(key = %key, "Not accepting work, skipping debounced reconcile");
            return Ok(None);
        }

        {
            let mut active = lock(&inner.active);
            if !active.insert(key.clone()) {
                lock(&inner.rerun).insert(key.clone());
                debug!(key = %key, "Reconcile still running, follow-up pass queued");
                return Ok(None);
            }
        }
        inner.ctx.metrics.active_reconciles.inc();
        let guard = ActiveGuard {
            inner: &inner,
            key: key.clone(),
        };

        let started = Instant::now();
        let result = inner.reconcilers.for_kind(key.kind).reconcile(&key).await;
        drop(guard);
        inner
            .ctx
            .metrics
            .record_reconcile(key.kind, started.elapsed().as_secs_f64());

        if lock(&inner.rerun).remove(&key) {
            debug!(key = %key, "Scheduling follow-up pass for trigger received mid-reconcile");
            Scheduler {
                inner: inner.clone(),
            }
            .schedule(key.clone());
        }

        match result {
            Ok(outcome) => {
                Self::after_outcome(&inner, &key, &outcome);
                Ok(Some(outcome))
            }
            Err(e) => {
                error!(key = %key, error = %e, error_type = e.error_type(), "Reconcile failed");
                inner.ctx.metrics.record_error(key.kind, e.error_type());
                if e.is_retryable() {
                    let attempts = inner.retries.attempts(&key);
                    inner
                        .retries
                        .schedule_retry(key, inner.config.error_backoff, attempts);
                } else {
                    // Only a spec or object change helps; that arrives as a watch event
                    warn!(key = %key, error_type = e.error_type(), "Permanent error, not retrying");
                }
                Err(e)
            }
        }
    }

    fn after_outcome(inner: &Arc<SchedulerInner>, key: &ResourceKey, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Done => {
                inner.retries.forget(key);
            }
            ReconcileOutcome::Recheck(delay) => {
                inner.retries.forget(key);
                let delay = *delay;
                let key = key.clone();
                let weak = Arc::downgrade(inner);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(inner) = weak.upgrade() {
                        Scheduler { inner }.schedule(key);
                    }
                });
            }
            ReconcileOutcome::Retry { backoff, reason } => {
                warn!(key = %key, reason = %reason, "Dependency not ready, scheduling retry");
                let attempts = inner.retries.attempts(key);
                inner.retries.schedule_retry(key.clone(), *backoff, attempts);
            }
        }
    }

    /// The retry queue feeding back into this scheduler
    pub fn retries(&self) -> &RetryQueue {
        &self.inner.retries
    }

    pub fn is_pending(&self, key: &ResourceKey) -> bool {
        lock(&self.inner.pending).contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn is_active(&self, key: &ResourceKey) -> bool {
        lock(&self.inner.active).contains(key)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.inner.active).len()
    }

    /// Stop accepting work, cancel pending timers and armed retries.
    /// Reconciles already running are left to finish.
    pub fn shutdown(&self) {
        self.inner.ctx.gate.begin_shutdown();
        let mut pending = lock(&self.inner.pending);
        for (_, handle) in pending.drain() {
            handle.abort();
        }
        drop(pending);
        self.inner.ctx.metrics.set_queue_depth(QUEUE_SCHEDULER, 0);
        lock(&self.inner.rerun).clear();
        self.inner.retries.cancel_all();
    }
}
