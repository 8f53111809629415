//! Reconciliation for QdrantRestore.
//!
//! Pending -> InProgress -> {Completed, Failed}. The reconciler launches a
//! one-shot Job and polls it to a terminal state inside a single pass.
//! Completed and Failed are terminal; a new QdrantRestore is needed to retry.
//! An InProgress restore whose poller was interrupted is picked up again by
//! the next pass, which re-launches (idempotently) and keeps polling.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::common::{ResourceKey, ResourceKind};
use crate::controller::context::ReconcileContext;
use crate::controller::error::Result;
use crate::controller::reconciler::{ReconcileOutcome, Reconciler};
use crate::controller::validation::validate_restore;
use crate::controller::wait::{Poll, PollConfig, WaitError, poll_until};
use crate::crd::{QdrantRestore, QdrantRestoreStatus, RestorePhase};
use crate::platform::JobState;

/// Interval between job status polls.
pub const RESTORE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Polls before a restore is declared timed out (about ten minutes).
pub const RESTORE_POLL_ATTEMPTS: u32 = 120;

/// Wall-clock bound on one polling pass. Slow job reads stretch the
/// attempts past their nominal interval; this caps the total.
pub const RESTORE_POLL_DEADLINE: Duration =
    Duration::from_secs(RESTORE_POLL_INTERVAL.as_secs() * RESTORE_POLL_ATTEMPTS as u64 + 60);

/// QdrantRestore state machine
pub struct RestoreReconciler {
    ctx: Arc<ReconcileContext>,
    poll: PollConfig,
    /// Restores whose job is being polled by a running pass.
    polling: Mutex<HashSet<ResourceKey>>,
}

/// Releases a key from the polling set when the pass ends.
struct PollingGuard<'a> {
    polling: &'a Mutex<HashSet<ResourceKey>>,
    key: ResourceKey,
}

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.polling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

impl RestoreReconciler {
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self {
            ctx,
            poll: PollConfig::new(RESTORE_POLL_INTERVAL, RESTORE_POLL_ATTEMPTS)
                .with_deadline(RESTORE_POLL_DEADLINE),
            polling: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, key: &ResourceKey) -> Option<PollingGuard<'_>> {
        let mut polling = self.polling.lock().unwrap_or_else(PoisonError::into_inner);
        polling.insert(key.clone()).then(|| PollingGuard {
            polling: &self.polling,
            key: key.clone(),
        })
    }

    async fn write_status(
        &self,
        restore: &QdrantRestore,
        status: QdrantRestoreStatus,
    ) -> Result<QdrantRestore> {
        if restore.status.as_ref() == Some(&status) {
            return Ok(restore.clone());
        }
        self.ctx.platform.patch_restore_status(restore, &status).await
    }

    /// Latest copy from the store, or `fallback` if it is gone.
    async fn latest(&self, key: &ResourceKey, fallback: &QdrantRestore) -> Result<QdrantRestore> {
        Ok(self
            .ctx
            .platform
            .get_restore(&key.namespace, &key.name)
            .await?
            .unwrap_or_else(|| fallback.clone()))
    }

    /// Re-fetch, then move to a terminal phase.
    async fn finish(
        &self,
        key: &ResourceKey,
        restore: &QdrantRestore,
        phase: RestorePhase,
        message: String,
        error_detail: Option<String>,
    ) -> Result<()> {
        let latest = self.latest(key, restore).await?;
        let status = QdrantRestoreStatus {
            phase,
            message: Some(message.clone()),
            error_detail,
            completed_at: Some(jiff::Timestamp::now().to_string()),
            ..latest.status.clone().unwrap_or_default()
        };
        self.write_status(&latest, status).await?;

        let event_type = if phase == RestorePhase::Completed {
            EventType::Normal
        } else {
            EventType::Warning
        };
        self.ctx
            .platform
            .publish_event(
                latest.object_ref(&()),
                event_type,
                &phase.to_string(),
                "Restoring",
                Some(message),
            )
            .await;
        Ok(())
    }

    async fn run(&self, key: &ResourceKey, restore: &QdrantRestore) -> Result<()> {
        let spec = &restore.spec;
        let status = restore.status.clone().unwrap_or_default();

        if let Err(e) = validate_restore(spec) {
            warn!(restore = %key.name, error = %e, "Spec validation failed");
            self.ctx.metrics.record_validation_error(ResourceKind::Restore);
            return self
                .finish(
                    key,
                    restore,
                    RestorePhase::Failed,
                    "Invalid restore spec".to_string(),
                    Some(e.to_string()),
                )
                .await;
        }

        let restore = if status.phase == RestorePhase::InProgress {
            restore.clone()
        } else {
            let message = format!(
                "Restoring collection {} in cluster {}",
                spec.collection, spec.cluster_ref
            );
            info!(restore = %key.name, "{message}");
            let next = QdrantRestoreStatus {
                phase: RestorePhase::InProgress,
                message: Some(message),
                started_at: Some(jiff::Timestamp::now().to_string()),
                ..status.clone()
            };
            self.write_status(restore, next).await?
        };

        let job_name = self.ctx.platform.launch_restore_job(&restore).await?;
        let restore = match restore.status.as_ref().and_then(|s| s.job_name.as_deref()) {
            Some(recorded) if recorded == job_name => restore,
            _ => {
                let latest = self.latest(key, &restore).await?;
                let next = QdrantRestoreStatus {
                    job_name: Some(job_name.clone()),
                    ..latest.status.clone().unwrap_or_default()
                };
                self.write_status(&latest, next).await?
            }
        };

        let platform = self.ctx.platform.clone();
        let namespace = key.namespace.clone();
        // Shutdown stops polling but leaves the restore InProgress; the next
        // leader resumes polling the same Job.
        let shutdown = self.ctx.gate.shutdown_signal();
        let polled = poll_until(&self.poll, Some(shutdown), |attempt| {
            let platform = platform.clone();
            let namespace = namespace.clone();
            let job_name = job_name.clone();
            async move {
                match platform.read_job_status(&namespace, &job_name).await? {
                    Some(JobState::Succeeded) => Ok(Poll::Ready(true)),
                    Some(JobState::Failed) => Ok(Poll::Ready(false)),
                    Some(JobState::Running) => Ok(Poll::Pending),
                    None => {
                        debug!(job = %job_name, attempt = attempt, "Restore job not visible yet");
                        Ok(Poll::Pending)
                    }
                }
            }
        })
        .await;

        match polled {
            Ok(true) => {
                info!(restore = %key.name, job = %job_name, "Restore completed");
                self.finish(
                    key,
                    &restore,
                    RestorePhase::Completed,
                    format!("Collection {} restored", spec.collection),
                    None,
                )
                .await
            }
            Ok(false) => {
                warn!(restore = %key.name, job = %job_name, "Restore job failed");
                self.finish(
                    key,
                    &restore,
                    RestorePhase::Failed,
                    "Restore job failed".to_string(),
                    None,
                )
                .await
            }
            Err(WaitError::Exhausted { attempts } | WaitError::DeadlineExceeded { attempts, .. }) => {
                warn!(restore = %key.name, job = %job_name, attempts = attempts, "Restore timed out");
                self.finish(
                    key,
                    &restore,
                    RestorePhase::Failed,
                    format!(
                        "Restore timed out after {} polls of {}s",
                        attempts,
                        self.poll.interval.as_secs()
                    ),
                    None,
                )
                .await
            }
            Err(WaitError::Cancelled { attempts }) => {
                info!(
                    restore = %key.name,
                    job = %job_name,
                    attempts = attempts,
                    "Shutting down, leaving restore in progress"
                );
                Ok(())
            }
            Err(WaitError::Check(e)) => Err(e),
        }
    }
}

#[async_trait]
impl Reconciler for RestoreReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Restore
    }

    #[instrument(skip(self), fields(kind = "restore"))]
    async fn reconcile(&self, key: &ResourceKey) -> Result<ReconcileOutcome> {
        let Some(restore) = self
            .ctx
            .platform
            .get_restore(&key.namespace, &key.name)
            .await?
        else {
            debug!(restore = %key.name, "QdrantRestore no longer exists");
            return Ok(ReconcileOutcome::Done);
        };

        let phase = restore.status.as_ref().map(|s| s.phase).unwrap_or_default();
        if phase.is_terminal() {
            debug!(restore = %key.name, phase = %phase, "Restore already finished");
            return Ok(ReconcileOutcome::Done);
        }

        let Some(_guard) = self.claim(key) else {
            debug!(restore = %key.name, "Restore job already being polled");
            return Ok(ReconcileOutcome::Done);
        };

        if let Err(e) = self.run(key, &restore).await {
            error!(restore = %key.name, error = %e, "Restore failed unexpectedly");
            self.ctx.metrics.record_restore_error();

            let latest = match self.ctx.platform.get_restore(&key.namespace, &key.name).await {
                Ok(Some(latest)) => latest,
                Ok(None) | Err(_) => restore,
            };
            let status = QdrantRestoreStatus {
                phase: RestorePhase::Failed,
                message: Some("Restore failed".to_string()),
                error_detail: Some(e.to_string()),
                completed_at: Some(jiff::Timestamp::now().to_string()),
                ..latest.status.clone().unwrap_or_default()
            };
            self.write_status(&latest, status).await?;
        }
        Ok(ReconcileOutcome::Done)
    }
}
