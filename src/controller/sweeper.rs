//! Periodic sweep of every known resource.
//!
//! Watch events can be missed across reconnects and retries can be abandoned
//! at the attempt cap. The sweep re-enqueues every resource on a fixed
//! interval so the system converges regardless.

use std::sync::Arc;
use std::time::Duration;

use kube::Resource;
use tracing::{debug, info, warn};

use crate::controller::common::{ResourceKey, ResourceKind};
use crate::controller::context::ReconcileContext;
use crate::controller::error::Result;
use crate::controller::scheduler::Scheduler;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Summary of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub listed: usize,
    pub scheduled: usize,
}

fn keys_of<K: Resource>(kind: ResourceKind, objects: &[K]) -> Vec<ResourceKey> {
    objects
        .iter()
        .map(|obj| ResourceKey::from_object(kind, obj))
        .collect()
}

async fn list_keys(ctx: &ReconcileContext, kind: ResourceKind) -> Result<Vec<ResourceKey>> {
    let platform = &ctx.platform;
    Ok(match kind {
        ResourceKind::Cluster => keys_of(kind, &platform.list_clusters().await?),
        ResourceKind::Collection => keys_of(kind, &platform.list_collections().await?),
        ResourceKind::Restore => keys_of(kind, &platform.list_restores().await?),
    })
}

/// Schedule every resource of every kind once.
///
/// A failed list for one kind is logged and does not stop the others.
pub async fn sweep_once(ctx: &ReconcileContext, scheduler: &Scheduler) -> SweepReport {
    let mut report = SweepReport::default();
    if !ctx.gate.accepting_work() {
        debug!("Not accepting work, skipping sweep");
        return report;
    }

    for kind in ResourceKind::ALL {
        match list_keys(ctx, kind).await {
            Ok(keys) => {
                report.listed += keys.len();
                for key in keys {
                    if scheduler.schedule(key).is_scheduled() {
                        report.scheduled += 1;
                    }
                }
            }
            Err(e) => warn!(kind = %kind, error = %e, "Sweep failed to list resources"),
        }
    }
    report
}

/// Run sweeps forever on `interval`. The first sweep runs after one interval.
pub async fn run_sweeper(ctx: Arc<ReconcileContext>, scheduler: Scheduler, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Starting periodic sweeper");
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut shutdown = ctx.gate.shutdown_signal();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|stopping| *stopping) => {
                info!("Shutting down, stopping sweeper");
                return;
            }
        }
        let report = sweep_once(&ctx, &scheduler).await;
        info!(
            listed = report.listed,
            scheduled = report.scheduled,
            "Periodic sweep complete"
        );
    }
}
