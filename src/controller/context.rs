//! Shared context for the reconcilers.
//!
//! One [`ReconcileContext`] is built at process start and passed by reference
//! to the scheduler, every reconciler and the sweeper. Tests build a fresh
//! one around in-memory fakes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use k8s_openapi::api::apps::v1::StatefulSet;
use tokio::sync::watch;
use tracing::info;

use crate::controller::cache::StateCache;
use crate::crd::{QdrantCluster, QdrantCollection};
use crate::database::DatabaseOps;
use crate::health::Metrics;
use crate::platform::PlatformOps;

/// Field manager name for server-side apply
pub const FIELD_MANAGER: &str = "qdrant-operator";

/// Leadership and shutdown signal consulted before any reconcile starts.
///
/// Losing leadership is treated the same as shutting down: nothing new is
/// scheduled, reconciles already running finish.
pub struct LeaderGate {
    leader: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Default for LeaderGate {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderGate {
    /// A gate that stays closed until leadership is acquired
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            leader: AtomicBool::new(false),
            shutdown,
        }
    }

    /// A gate that is open from the start (leader election disabled)
    pub fn open() -> Self {
        let gate = Self::new();
        gate.set_leader(true);
        gate
    }

    pub fn set_leader(&self, leader: bool) {
        let was = self.leader.swap(leader, Ordering::SeqCst);
        if was != leader {
            info!(leader = leader, "Leadership changed");
        }
    }

    pub fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    /// Flip the process-wide shutting-down flag. Irreversible.
    pub fn begin_shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Shutdown requested, no new reconciles will start");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that flips to `true` on shutdown
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Whether new reconciles may start
    pub fn accepting_work(&self) -> bool {
        self.is_leader() && !self.is_shutting_down()
    }
}

/// Shared state passed to every reconciler
pub struct ReconcileContext {
    /// Authoritative store and platform objects
    pub platform: Arc<dyn PlatformOps>,
    /// Database data-plane API
    pub database: Arc<dyn DatabaseOps>,
    /// Last observed StatefulSet per cluster key
    pub workloads: StateCache<StatefulSet>,
    /// Last observed QdrantCluster per key
    pub clusters: StateCache<QdrantCluster>,
    /// Last observed QdrantCollection per key
    pub collections: StateCache<QdrantCollection>,
    pub metrics: Arc<Metrics>,
    pub gate: Arc<LeaderGate>,
}

impl ReconcileContext {
    pub fn new(
        platform: Arc<dyn PlatformOps>,
        database: Arc<dyn DatabaseOps>,
        metrics: Arc<Metrics>,
        gate: Arc<LeaderGate>,
    ) -> Self {
        Self {
            platform,
            database,
            workloads: StateCache::new(),
            clusters: StateCache::new(),
            collections: StateCache::new(),
            metrics,
            gate,
        }
    }
}
