//! qdrant-operator library crate
//!
//! This module exports the controller, CRD definitions, resource generators,
//! and the [`Operator`] that wires watch streams and the periodic sweep into
//! the scheduler.

pub mod config;
pub mod controller;
pub mod crd;
pub mod database;
pub mod health;
pub mod platform;
pub mod resources;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::runtime::watcher::{Config as WatcherConfig, Event};
use kube::runtime::{WatchStreamExt, predicates, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use controller::common::{ResourceKey, ResourceKind};
use controller::context::{LeaderGate, ReconcileContext};
use controller::error::Result;
use controller::scheduler::{Reconcilers, Scheduler, SchedulerConfig};
use controller::sweeper::run_sweeper;
use crd::{QdrantCluster, QdrantCollection, QdrantRestore};
use database::QdrantHttpClient;
use health::Metrics;
use platform::KubePlatform;
use resources::common::MANAGED_BY;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Create the default watcher configuration for all watch streams.
///
/// `any_semantic()` gives more reliable resource discovery in test
/// environments.
fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Objects from a watch whose `metadata.generation` changed.
///
/// Status writes bump the resourceVersion but not the generation, so without
/// the predicate every status patch would schedule another reconcile of the
/// same object.
fn generation_changes<K, S>(events: S) -> impl Stream<Item = watcher::Result<K>>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
    S: Stream<Item = watcher::Result<Event<K>>>,
{
    events
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation)
}

/// Resolve when the gate reports shutdown.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    // A dropped gate counts as shutdown too
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

/// Feed one custom resource kind into the scheduler until shutdown.
async fn watch_custom_resources<K>(
    objects: impl Stream<Item = watcher::Result<K>>,
    kind: ResourceKind,
    scheduler: Scheduler,
    mut shutdown: watch::Receiver<bool>,
) where
    K: Resource,
{
    info!(kind = %kind, "Starting watch");
    let mut objects = std::pin::pin!(objects);

    loop {
        let next = tokio::select! {
            next = objects.next() => next,
            _ = stopped(&mut shutdown) => break,
        };
        match next {
            Some(Ok(obj)) => {
                scheduler.schedule(ResourceKey::from_object(kind, &obj));
            }
            Some(Err(e)) => warn!(kind = %kind, error = %e, "Watch error"),
            None => break,
        }
    }
    info!(kind = %kind, "Watch stopped");
}

/// Key of the QdrantCluster owning a StatefulSet, if any.
pub fn owning_cluster_key(workload: &StatefulSet) -> Option<ResourceKey> {
    let owner = workload
        .owner_references()
        .iter()
        .find(|owner| owner.kind == QdrantCluster::kind(&()) && owner.controller == Some(true))?;
    Some(ResourceKey::new(
        ResourceKind::Cluster,
        workload.namespace().unwrap_or_else(|| "default".to_string()),
        owner.name.clone(),
    ))
}

/// Watch managed StatefulSets and schedule their owning cluster.
///
/// Readiness changes only show up in workload status, so no generation
/// filter here. Deletes are passed on too: the reflector has already dropped
/// the workload from the cache and the owner's next pass recreates it.
async fn watch_workloads(
    api: Api<StatefulSet>,
    ctx: Arc<ReconcileContext>,
    scheduler: Scheduler,
    mut shutdown: watch::Receiver<bool>,
) {
    let config =
        default_watcher_config().labels(&format!("app.kubernetes.io/managed-by={MANAGED_BY}"));
    let mut workloads = std::pin::pin!(
        ctx.workloads
            .reflect(watcher(api, config))
            .default_backoff()
            .touched_objects()
    );

    loop {
        let next = tokio::select! {
            next = workloads.next() => next,
            _ = stopped(&mut shutdown) => break,
        };
        match next {
            Some(Ok(workload)) => {
                if let Some(key) = owning_cluster_key(&workload) {
                    debug!(cluster = %key.name, "Workload changed");
                    scheduler.schedule(key);
                }
            }
            Some(Err(e)) => warn!(error = %e, "Workload watch error"),
            None => break,
        }
    }
}

/// The running operator: context, scheduler and the event sources feeding it.
#[derive(Clone)]
pub struct Operator {
    client: Client,
    namespace: Option<String>,
    sweep_interval: Duration,
    pub ctx: Arc<ReconcileContext>,
    pub scheduler: Scheduler,
}

impl Operator {
    pub fn new(
        client: Client,
        config: &OperatorConfig,
        metrics: Arc<Metrics>,
        gate: Arc<LeaderGate>,
    ) -> Result<Self> {
        let platform = Arc::new(KubePlatform::new(
            client.clone(),
            config.watch_namespace.clone(),
            config.job_image.clone(),
            config.pod_name.clone(),
        ));
        let database = Arc::new(QdrantHttpClient::new(config.database_timeout())?);
        let ctx = Arc::new(ReconcileContext::new(platform, database, metrics, gate));
        let scheduler = Scheduler::new(
            ctx.clone(),
            Reconcilers::new(ctx.clone()),
            SchedulerConfig {
                debounce: config.debounce(),
                error_backoff: config.error_backoff(),
            },
        );

        Ok(Self {
            client,
            namespace: config.watch_namespace.clone(),
            sweep_interval: config.sweep_interval(),
            ctx,
            scheduler,
        })
    }

    /// Run watches and the sweeper until the gate reports shutdown.
    pub async fn run(self) {
        let scope = self.namespace.as_deref().unwrap_or("cluster-wide");
        info!(scope = %scope, "Starting qdrant-operator controller");

        let namespace = self.namespace.as_deref();
        let shutdown = || self.ctx.gate.shutdown_signal();

        // Clusters and collections are reflected into the context caches
        let clusters = self.ctx.clusters.reflect(watcher(
            scoped_api::<QdrantCluster>(self.client.clone(), namespace),
            default_watcher_config(),
        ));
        let collections = self.ctx.collections.reflect(watcher(
            scoped_api::<QdrantCollection>(self.client.clone(), namespace),
            default_watcher_config(),
        ));
        let restores = watcher(
            scoped_api::<QdrantRestore>(self.client.clone(), namespace),
            default_watcher_config(),
        );

        tokio::join!(
            watch_custom_resources(
                generation_changes(clusters),
                ResourceKind::Cluster,
                self.scheduler.clone(),
                shutdown(),
            ),
            watch_custom_resources(
                generation_changes(collections),
                ResourceKind::Collection,
                self.scheduler.clone(),
                shutdown(),
            ),
            watch_custom_resources(
                generation_changes(restores),
                ResourceKind::Restore,
                self.scheduler.clone(),
                shutdown(),
            ),
            watch_workloads(
                scoped_api::<StatefulSet>(self.client.clone(), namespace),
                self.ctx.clone(),
                self.scheduler.clone(),
                shutdown(),
            ),
            run_sweeper(self.ctx.clone(), self.scheduler.clone(), self.sweep_interval),
        );

        info!("Controller stopped");
    }

    /// Stop scheduling and cancel pending timers. Running reconciles finish.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
