//! Reconciliation for QdrantCollection.
//!
//! A collection waits for its owning cluster, checks database health, then
//! issues a single idempotent create-or-update call. The local cache is never
//! used to choose between create and update.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::controller::common::{ResourceKey, ResourceKind, WorkloadReadiness};
use crate::controller::context::ReconcileContext;
use crate::controller::error::Result;
use crate::controller::reconciler::{ReconcileOutcome, Reconciler};
use crate::controller::status::ConditionBuilder;
use crate::controller::validation::validate_collection;
use crate::crd::{
    CollectionPhase, QdrantCluster, QdrantCollection, QdrantCollectionStatus, REASON_INVALID_SPEC,
};
use crate::database::DatabaseEndpoint;

/// Bound on the database health check.
pub const DATABASE_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// QdrantCollection state machine
pub struct CollectionReconciler {
    ctx: Arc<ReconcileContext>,
}

impl CollectionReconciler {
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self { ctx }
    }

    /// Write status unless phase, reason, message and generation already match.
    async fn write_status(
        &self,
        key: &ResourceKey,
        collection: &QdrantCollection,
        phase: CollectionPhase,
        reason: Option<&str>,
        message: &str,
    ) -> Result<bool> {
        let current = collection.status.clone().unwrap_or_default();
        let generation = collection.metadata.generation;
        if current.phase == phase
            && current.reason.as_deref() == reason
            && current.message.as_deref() == Some(message)
            && current.observed_generation == generation
        {
            return Ok(false);
        }

        let ready = phase == CollectionPhase::Ready;
        let condition_reason = reason.unwrap_or("CollectionReady");
        let mut conditions = ConditionBuilder::from_existing(&current.conditions);
        conditions.ready(ready, condition_reason, message, generation);
        if phase == CollectionPhase::Error {
            conditions.degraded(true, condition_reason, message, generation);
        } else {
            conditions.degraded(false, condition_reason, "", generation);
        }

        let status = QdrantCollectionStatus {
            phase,
            reason: reason.map(str::to_string),
            message: Some(message.to_string()),
            conditions: conditions.build(),
            observed_generation: generation,
        };
        let updated = self
            .ctx
            .platform
            .patch_collection_status(collection, &status)
            .await?;
        self.ctx.collections.put(updated);
        Ok(true)
    }

    /// Park the collection in Pending and retry after the readiness delay.
    async fn wait(
        &self,
        key: &ResourceKey,
        collection: &QdrantCollection,
        reason: &str,
        message: String,
    ) -> Result<ReconcileOutcome> {
        info!(collection = %key.name, reason = %reason, "{message}");
        self.write_status(key, collection, CollectionPhase::Pending, Some(reason), &message)
            .await?;
        Ok(ReconcileOutcome::retry_after_readiness(message))
    }

    /// Owning cluster from the cache, falling back to the authoritative store.
    async fn owning_cluster(&self, cluster_key: &ResourceKey) -> Result<Option<QdrantCluster>> {
        if let Some(cluster) = self.ctx.clusters.get(cluster_key) {
            return Ok(Some(cluster));
        }
        let cluster = self
            .ctx
            .platform
            .get_cluster(&cluster_key.namespace, &cluster_key.name)
            .await?;
        if let Some(cluster) = &cluster {
            self.ctx.clusters.put(cluster.clone());
        }
        Ok(cluster)
    }

    /// Whether the workload is ready even though cluster status says otherwise.
    async fn workload_ready(&self, cluster_key: &ResourceKey, cluster: &QdrantCluster) -> bool {
        match self
            .ctx
            .platform
            .get_workload(&cluster_key.namespace, &cluster_key.name)
            .await
        {
            Ok(Some(workload)) => {
                self.ctx.workloads.put(workload.clone());
                WorkloadReadiness::of(&workload, cluster.spec.replicas).is_ready()
            }
            Ok(None) => false,
            Err(e) => {
                warn!(cluster = %cluster_key.name, error = %e, "Failed to read workload");
                false
            }
        }
    }

    async fn sync(&self, key: &ResourceKey, collection: &QdrantCollection) -> Result<ReconcileOutcome> {
        let spec = &collection.spec;
        let cluster_key = key.sibling(ResourceKind::Cluster, spec.cluster_ref.clone());

        let cluster = match self.owning_cluster(&cluster_key).await {
            Ok(Some(cluster)) => cluster,
            Ok(None) => {
                return self
                    .wait(
                        key,
                        collection,
                        "ClusterNotFound",
                        format!("QdrantCluster {} not found", spec.cluster_ref),
                    )
                    .await;
            }
            Err(e) => {
                warn!(collection = %key.name, error = %e, "Failed to read owning cluster");
                return Ok(ReconcileOutcome::retry_after_readiness(format!(
                    "failed to read QdrantCluster {}: {e}",
                    spec.cluster_ref
                )));
            }
        };

        let phase = cluster.status.as_ref().map(|s| s.phase).unwrap_or_default();
        if !phase.is_ready() {
            if self.workload_ready(&cluster_key, &cluster).await {
                info!(
                    collection = %key.name,
                    cluster = %spec.cluster_ref,
                    phase = %phase,
                    "Cluster status lags but workload is ready, proceeding"
                );
            } else {
                return self
                    .wait(
                        key,
                        collection,
                        "ClusterNotReady",
                        format!("QdrantCluster {} is {}", spec.cluster_ref, phase),
                    )
                    .await;
            }
        }

        let api_key = self.ctx.platform.read_api_key(&cluster).await?;
        let endpoint = DatabaseEndpoint::for_cluster(&cluster, api_key);

        let health = tokio::time::timeout(DATABASE_HEALTH_TIMEOUT, self.ctx.database.health(&endpoint));
        match health.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return self
                    .wait(
                        key,
                        collection,
                        "DatabaseUnavailable",
                        format!("Database health check failed: {e}"),
                    )
                    .await;
            }
            Err(_) => {
                return self
                    .wait(
                        key,
                        collection,
                        "DatabaseUnavailable",
                        format!(
                            "Database health check timed out after {}s",
                            DATABASE_HEALTH_TIMEOUT.as_secs()
                        ),
                    )
                    .await;
            }
        }

        let name = collection.name_any();
        self.ctx
            .database
            .upsert_collection(&endpoint, &name, spec)
            .await?;
        debug!(collection = %name, "Collection upserted");

        // Scheduled jobs are best-effort; the collection itself is what matters.
        if let Err(e) = self
            .ctx
            .platform
            .apply_collection_jobs(collection, &cluster)
            .await
        {
            warn!(collection = %name, error = %e, "Failed to apply snapshot jobs");
        }

        let message = format!(
            "Collection ready in cluster {} ({} dimensions, {})",
            spec.cluster_ref, spec.vector_size, spec.distance
        );
        if self
            .write_status(key, collection, CollectionPhase::Ready, None, &message)
            .await?
        {
            self.ctx
                .platform
                .publish_event(
                    collection.object_ref(&()),
                    EventType::Normal,
                    "CollectionReady",
                    "Reconciling",
                    Some(message),
                )
                .await;
        }
        Ok(ReconcileOutcome::Done)
    }
}

#[async_trait]
impl Reconciler for CollectionReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Collection
    }

    #[instrument(skip(self), fields(kind = "collection"))]
    async fn reconcile(&self, key: &ResourceKey) -> Result<ReconcileOutcome> {
        let Some(collection) = self
            .ctx
            .platform
            .get_collection(&key.namespace, &key.name)
            .await?
        else {
            debug!(collection = %key.name, "QdrantCollection no longer exists");
            self.ctx.collections.evict(key);
            return Ok(ReconcileOutcome::Done);
        };
        self.ctx.collections.put(collection.clone());

        if collection.metadata.deletion_timestamp.is_some() {
            return Ok(ReconcileOutcome::Done);
        }

        let status = collection.status.clone().unwrap_or_default();
        if status.is_invalid_spec() && status.observed_generation == collection.metadata.generation
        {
            debug!(collection = %key.name, "Spec unchanged since validation failure");
            return Ok(ReconcileOutcome::Done);
        }

        if let Err(e) = validate_collection(&collection.spec) {
            if status.is_invalid_spec() {
                debug!(collection = %key.name, error = %e, "Spec still invalid");
                return Ok(ReconcileOutcome::Done);
            }
            warn!(collection = %key.name, error = %e, "Spec validation failed");
            self.ctx
                .metrics
                .record_validation_error(ResourceKind::Collection);
            let message = e.to_string();
            self.write_status(
                key,
                &collection,
                CollectionPhase::Error,
                Some(REASON_INVALID_SPEC),
                &message,
            )
            .await?;
            self.ctx
                .platform
                .publish_event(
                    collection.object_ref(&()),
                    EventType::Warning,
                    REASON_INVALID_SPEC,
                    "Validating",
                    Some(message),
                )
                .await;
            return Ok(ReconcileOutcome::Done);
        }

        match self.sync(key, &collection).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                // Refresh the cache so the retry starts from the latest object.
                let latest = match self
                    .ctx
                    .platform
                    .get_collection(&key.namespace, &key.name)
                    .await
                {
                    Ok(Some(latest)) => latest,
                    Ok(None) | Err(_) => collection,
                };
                self.ctx.collections.put(latest);
                Err(e)
            }
        }
    }
}
