//! The reconciler interface shared by the three resource kinds.

use std::time::Duration;

use async_trait::async_trait;

use crate::controller::common::{ResourceKey, ResourceKind};
use crate::controller::error::Result;
use crate::controller::retry_queue::Backoff;

/// Delay used when waiting on readiness of a workload or database.
pub const READINESS_RETRY: Duration = Duration::from_secs(5);

/// How a reconcile pass ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing left to do until the next event or sweep.
    Done,
    /// Progress was made; look again after the delay. Not a retry.
    Recheck(Duration),
    /// A dependency was unavailable; retry through the retry queue.
    Retry { backoff: Backoff, reason: String },
}

impl ReconcileOutcome {
    /// Fixed-delay retry used for readiness and health check failures.
    pub fn retry_after_readiness(reason: impl Into<String>) -> Self {
        ReconcileOutcome::Retry {
            backoff: Backoff::Fixed(READINESS_RETRY),
            reason: reason.into(),
        }
    }
}

/// One state machine per resource kind.
///
/// Reconcilers always re-read the object named by `key` from the
/// authoritative store; the key is the only input they trust.
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn kind(&self) -> ResourceKind;

    async fn reconcile(&self, key: &ResourceKey) -> Result<ReconcileOutcome>;
}
