//! Bounded retry queue.
//!
//! At most one armed retry timer exists per resource key. Re-scheduling a key
//! that already has a timer cancels the old timer and keeps the existing
//! attempt count, so duplicate failure reports during a backoff window never
//! reset the backoff. Expired timers re-enter the scheduler rather than
//! running the reconciler directly, so debounce and dedup still apply.
//!
//! The number of fired retries is remembered per key until a reconcile
//! succeeds, which is what makes the attempt cap hold across passes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::controller::common::ResourceKey;
use crate::health::{Metrics, QUEUE_RETRY};

/// Retries allowed per key before it is abandoned until the next event or sweep.
pub const MAX_RETRIES: u32 = 20;

/// Delay policy for a retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay for every attempt.
    Fixed(Duration),
    /// `base * 2^attempt`, never more than `cap`.
    Exponential { base: Duration, cap: Duration },
}

impl Backoff {
    /// Delay before the retry numbered `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, cap } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base.checked_mul(factor).unwrap_or(cap).min(cap)
            }
        }
    }
}

/// Result of a `schedule_retry` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// A timer is armed for this attempt.
    Scheduled { attempt: u32, delay: Duration },
    /// The attempt budget is spent; nothing was armed.
    Exhausted { attempts: u32 },
}

/// Callback invoked when a retry timer expires.
pub type RetryFn = Arc<dyn Fn(ResourceKey) + Send + Sync>;

struct RetryEntry {
    attempt_count: u32,
    scheduled_at: Instant,
    seq: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct RetryState {
    pending: HashMap<ResourceKey, RetryEntry>,
    fired: HashMap<ResourceKey, u32>,
    next_seq: u64,
}

/// In-memory retry queue, one armed timer per key.
#[derive(Clone)]
pub struct RetryQueue {
    state: Arc<Mutex<RetryState>>,
    on_fire: RetryFn,
    metrics: Arc<Metrics>,
}

impl RetryQueue {
    pub fn new(metrics: Arc<Metrics>, on_fire: RetryFn) -> Self {
        Self {
            state: Arc::new(Mutex::new(RetryState::default())),
            on_fire,
            metrics,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RetryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm a retry for `key`.
    ///
    /// `attempt_count` is only a hint: if a retry is already armed for the key,
    /// its attempt count wins and its timer is replaced.
    pub fn schedule_retry(
        &self,
        key: ResourceKey,
        backoff: Backoff,
        attempt_count: u32,
    ) -> RetryDecision {
        let mut state = self.lock();

        let attempt = match state.pending.remove(&key) {
            Some(existing) => {
                existing.timer.abort();
                debug!(
                    key = %key,
                    attempt = existing.attempt_count,
                    ignored_hint = attempt_count,
                    "Replacing armed retry timer"
                );
                existing.attempt_count
            }
            None => attempt_count,
        };

        if attempt >= MAX_RETRIES {
            let depth = state.pending.len();
            drop(state);
            self.metrics.set_queue_depth(QUEUE_RETRY, depth);
            self.metrics.record_retries_exhausted(key.kind);
            error!(
                key = %key,
                attempts = attempt,
                max_retries = MAX_RETRIES,
                "Retry budget exhausted, dropping until next event or sweep"
            );
            return RetryDecision::Exhausted { attempts: attempt };
        }

        let delay = backoff.delay(attempt);
        state.next_seq += 1;
        let seq = state.next_seq;
        let timer = tokio::spawn(Self::fire_after(self.clone(), key.clone(), seq, delay));
        state.pending.insert(
            key.clone(),
            RetryEntry {
                attempt_count: attempt,
                scheduled_at: Instant::now(),
                seq,
                timer,
            },
        );
        let depth = state.pending.len();
        drop(state);

        self.metrics.set_queue_depth(QUEUE_RETRY, depth);
        info!(
            key = %key,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Scheduled retry"
        );
        RetryDecision::Scheduled { attempt, delay }
    }

    async fn fire_after(queue: RetryQueue, key: ResourceKey, seq: u64, delay: Duration) {
        tokio::time::sleep(delay).await;

        let (fired, depth) = {
            let mut state = queue.lock();
            // A replaced timer may wake after its successor was armed.
            let current = state.pending.get(&key).is_some_and(|e| e.seq == seq);
            if current {
                if let Some(entry) = state.pending.remove(&key) {
                    debug!(
                        key = %key,
                        waited_ms = entry.scheduled_at.elapsed().as_millis() as u64,
                        "Retry timer expired"
                    );
                    state.fired.insert(key.clone(), entry.attempt_count + 1);
                }
            }
            (current, state.pending.len())
        };

        if fired {
            queue.metrics.set_queue_depth(QUEUE_RETRY, depth);
            (queue.on_fire)(key);
        }
    }

    /// Number of retries already fired for `key` since its last success.
    pub fn attempts(&self, key: &ResourceKey) -> u32 {
        let state = self.lock();
        state
            .pending
            .get(key)
            .map(|e| e.attempt_count)
            .or_else(|| state.fired.get(key).copied())
            .unwrap_or(0)
    }

    /// Whether a retry timer is armed for `key`.
    pub fn is_pending(&self, key: &ResourceKey) -> bool {
        self.lock().pending.contains_key(key)
    }

    /// Number of armed retry timers.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the retry history of `key` after a successful reconcile.
    pub fn forget(&self, key: &ResourceKey) {
        let mut state = self.lock();
        if let Some(entry) = state.pending.remove(key) {
            entry.timer.abort();
        }
        state.fired.remove(key);
        let depth = state.pending.len();
        drop(state);
        self.metrics.set_queue_depth(QUEUE_RETRY, depth);
    }

    /// Abort every armed timer. Used on shutdown.
    pub fn cancel_all(&self) {
        let mut state = self.lock();
        for (_, entry) in state.pending.drain() {
            entry.timer.abort();
        }
        drop(state);
        self.metrics.set_queue_depth(QUEUE_RETRY, 0);
    }
}
