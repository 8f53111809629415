//! Reconciliation for QdrantCluster.
//!
//! Drives the StatefulSet and its collaborators toward the spec:
//!
//! - no workload: create every dependent resource, then the workload
//! - workload exists and `lastAppliedHash` matches: skip the workload,
//!   re-apply the cheap collaborators, then confirm the workload still
//!   exists and report its readiness
//! - hash differs: record drift and re-apply the workload unconditionally,
//!   relying on server-side apply to roll out only real changes
//!
//! Error/InvalidSpec is sticky until the spec changes and validates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::controller::common::{ResourceKey, ResourceKind, WorkloadReadiness};
use crate::controller::context::ReconcileContext;
use crate::controller::error::Result;
use crate::controller::reconciler::{READINESS_RETRY, ReconcileOutcome, Reconciler};
use crate::controller::spec_hash::compute_spec_hash;
use crate::controller::status::ConditionBuilder;
use crate::controller::validation::validate_cluster;
use crate::crd::{ClusterPhase, QdrantCluster, QdrantClusterStatus, REASON_INVALID_SPEC};

/// QdrantCluster state machine
pub struct ClusterReconciler {
    ctx: Arc<ReconcileContext>,
}

impl ClusterReconciler {
    pub fn new(ctx: Arc<ReconcileContext>) -> Self {
        Self { ctx }
    }

    /// Workload from the cache, falling back to the authoritative store.
    async fn observed_workload(&self, key: &ResourceKey) -> Result<Option<StatefulSet>> {
        if let Some(workload) = self.ctx.workloads.get(key) {
            return Ok(Some(workload));
        }
        let workload = self
            .ctx
            .platform
            .get_workload(&key.namespace, &key.name)
            .await?;
        if let Some(workload) = &workload {
            self.ctx.workloads.put(workload.clone());
        }
        Ok(workload)
    }

    async fn write_status(
        &self,
        key: &ResourceKey,
        cluster: &QdrantCluster,
        mut status: QdrantClusterStatus,
    ) -> Result<QdrantCluster> {
        status.resource_version = cluster.resource_version();
        status.observed_generation = cluster.metadata.generation;
        let updated = self
            .ctx
            .platform
            .patch_cluster_status(cluster, &status)
            .await?;
        self.ctx.clusters.put(updated.clone());
        Ok(updated)
    }

    async fn publish(&self, cluster: &QdrantCluster, event_type: EventType, reason: &str, note: String) {
        self.ctx
            .platform
            .publish_event(cluster.object_ref(&()), event_type, reason, "Reconciling", Some(note))
            .await;
    }

    /// Config, services, disruption budget and network policy. None of these
    /// trigger a rollout, so they are applied on every pass.
    async fn apply_cheap_collaborators(&self, cluster: &QdrantCluster) -> Result<()> {
        let platform = &self.ctx.platform;
        platform.apply_config_map(cluster).await?;
        platform.apply_services(cluster).await?;
        platform.apply_disruption_budget(cluster).await?;
        platform.apply_network_policy(cluster).await?;
        Ok(())
    }

    async fn reject_invalid_spec(
        &self,
        key: &ResourceKey,
        cluster: &QdrantCluster,
        status: &QdrantClusterStatus,
        message: String,
    ) -> Result<ReconcileOutcome> {
        if status.is_invalid_spec() {
            debug!(cluster = %key.name, error = %message, "Spec still invalid");
            return Ok(ReconcileOutcome::Done);
        }

        warn!(cluster = %key.name, error = %message, "Spec validation failed");
        self.ctx
            .metrics
            .record_validation_error(ResourceKind::Cluster);

        let generation = cluster.metadata.generation;
        let mut conditions = ConditionBuilder::from_existing(&status.conditions);
        conditions
            .ready(false, REASON_INVALID_SPEC, &message, generation)
            .reconciling(false, REASON_INVALID_SPEC, "Waiting for a spec change", generation)
            .degraded(true, REASON_INVALID_SPEC, &message, generation);

        let next = QdrantClusterStatus {
            phase: ClusterPhase::Error,
            reason: Some(REASON_INVALID_SPEC.to_string()),
            message: Some(message.clone()),
            conditions: conditions.build(),
            ..status.clone()
        };
        self.write_status(key, cluster, next).await?;
        self.publish(cluster, EventType::Warning, REASON_INVALID_SPEC, message)
            .await;
        Ok(ReconcileOutcome::Done)
    }

    /// First pass: create everything in dependency order.
    async fn create(
        &self,
        key: &ResourceKey,
        cluster: &QdrantCluster,
        status: &QdrantClusterStatus,
        desired_hash: String,
    ) -> Result<ReconcileOutcome> {
        info!(cluster = %key.name, "No workload found, creating resources");
        let platform = &self.ctx.platform;
        platform.apply_config_map(cluster).await?;
        platform.apply_secrets(cluster).await?;
        platform.apply_services(cluster).await?;
        platform.apply_disruption_budget(cluster).await?;
        platform.apply_network_policy(cluster).await?;
        let workload = platform.apply_workload(cluster).await?;
        self.ctx.workloads.put(workload);

        let generation = cluster.metadata.generation;
        let mut conditions = ConditionBuilder::from_existing(&status.conditions);
        conditions
            .ready(false, "Creating", "Waiting for replicas", generation)
            .reconciling(true, "Creating", "Resources created", generation)
            .degraded(false, "Creating", "", generation);

        let next = QdrantClusterStatus {
            phase: ClusterPhase::Pending,
            reason: None,
            message: Some("Resources created, waiting for replicas".to_string()),
            conditions: conditions.build(),
            last_applied_hash: Some(desired_hash),
            ready_replicas: 0,
            ..status.clone()
        };
        self.write_status(key, cluster, next).await?;
        self.publish(
            cluster,
            EventType::Normal,
            "Created",
            format!("Created workload with {} replicas", cluster.spec.replicas),
        )
        .await;
        Ok(ReconcileOutcome::Recheck(READINESS_RETRY))
    }

    /// Hash differed: re-apply the workload and record the new hash.
    async fn reapply_workload(
        &self,
        key: &ResourceKey,
        cluster: &QdrantCluster,
        status: &QdrantClusterStatus,
        desired_hash: String,
    ) -> Result<ReconcileOutcome> {
        let generation = cluster.metadata.generation;
        let mut conditions = ConditionBuilder::from_existing(&status.conditions);
        conditions.reconciling(true, "DriftDetected", "Re-applying workload", generation);
        let in_progress = QdrantClusterStatus {
            phase: ClusterPhase::OperationInProgress,
            reason: Some("DriftDetected".to_string()),
            message: Some("Applying spec changes".to_string()),
            conditions: conditions.build(),
            ..status.clone()
        };
        let cluster = self.write_status(key, cluster, in_progress.clone()).await?;

        let workload = self.ctx.platform.apply_workload(&cluster).await?;
        self.ctx.workloads.put(workload);

        let applied = QdrantClusterStatus {
            last_applied_hash: Some(desired_hash),
            ..in_progress
        };
        self.write_status(key, &cluster, applied).await?;
        self.publish(
            &cluster,
            EventType::Normal,
            "SpecApplied",
            "Workload re-applied after spec change".to_string(),
        )
        .await;
        Ok(ReconcileOutcome::Recheck(READINESS_RETRY))
    }

    /// No drift: make status reflect what the workload actually reports.
    async fn check_readiness(
        &self,
        key: &ResourceKey,
        cluster: &QdrantCluster,
        status: &QdrantClusterStatus,
    ) -> Result<ReconcileOutcome> {
        let Some(workload) = self
            .ctx
            .platform
            .get_workload(&key.namespace, &key.name)
            .await?
        else {
            // The cached workload was stale; the next pass takes the create path.
            info!(cluster = %key.name, "Workload disappeared, recreating");
            self.ctx.workloads.evict(key);
            return Ok(ReconcileOutcome::Recheck(Duration::ZERO));
        };
        self.ctx.workloads.put(workload.clone());

        let readiness = WorkloadReadiness::of(&workload, cluster.spec.replicas);
        let generation = cluster.metadata.generation;
        let mut conditions = ConditionBuilder::from_existing(&status.conditions);

        if readiness.is_ready() {
            if status.phase == ClusterPhase::Healthy
                && status.ready_replicas == readiness.ready
                && status.observed_generation == generation
            {
                debug!(cluster = %key.name, "Cluster already healthy");
                return Ok(ReconcileOutcome::Done);
            }
            conditions
                .ready(true, "AllReplicasReady", &readiness.to_string(), generation)
                .reconciling(false, "AllReplicasReady", "", generation)
                .degraded(false, "AllReplicasReady", "", generation);
            let next = QdrantClusterStatus {
                phase: ClusterPhase::Healthy,
                reason: None,
                message: Some(readiness.to_string()),
                conditions: conditions.build(),
                ready_replicas: readiness.ready,
                ..status.clone()
            };
            self.write_status(key, cluster, next).await?;
            info!(cluster = %key.name, "Cluster is healthy");
            self.publish(cluster, EventType::Normal, "Healthy", readiness.to_string())
                .await;
            return Ok(ReconcileOutcome::Done);
        }

        let unchanged = status.phase == ClusterPhase::OperationInProgress
            && status.message.as_deref() == Some(readiness.to_string().as_str());
        if !unchanged {
            conditions
                .ready(false, "ReplicasNotReady", &readiness.to_string(), generation)
                .reconciling(true, "WaitingForReplicas", &readiness.to_string(), generation);
            let next = QdrantClusterStatus {
                phase: ClusterPhase::OperationInProgress,
                reason: Some("WaitingForReplicas".to_string()),
                message: Some(readiness.to_string()),
                conditions: conditions.build(),
                ready_replicas: readiness.ready,
                ..status.clone()
            };
            self.write_status(key, cluster, next).await?;
        }
        debug!(cluster = %key.name, readiness = %readiness, "Waiting for replicas");
        Ok(ReconcileOutcome::Recheck(READINESS_RETRY))
    }
}

#[async_trait]
impl Reconciler for ClusterReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Cluster
    }

    #[instrument(skip(self), fields(kind = "cluster"))]
    async fn reconcile(&self, key: &ResourceKey) -> Result<ReconcileOutcome> {
        let Some(cluster) = self
            .ctx
            .platform
            .get_cluster(&key.namespace, &key.name)
            .await?
        else {
            debug!(cluster = %key.name, "QdrantCluster no longer exists");
            self.ctx.clusters.evict(key);
            self.ctx.workloads.evict(key);
            return Ok(ReconcileOutcome::Done);
        };
        self.ctx.clusters.put(cluster.clone());

        if cluster.metadata.deletion_timestamp.is_some() {
            // Owned resources are garbage collected through owner references.
            debug!(cluster = %key.name, "QdrantCluster is being deleted");
            return Ok(ReconcileOutcome::Done);
        }

        let status = cluster.status.clone().unwrap_or_default();

        if status.is_invalid_spec() && status.observed_generation == cluster.metadata.generation {
            debug!(cluster = %key.name, "Spec unchanged since validation failure");
            return Ok(ReconcileOutcome::Done);
        }

        if let Err(e) = validate_cluster(&cluster.spec) {
            return self
                .reject_invalid_spec(key, &cluster, &status, e.to_string())
                .await;
        }

        let desired_hash = compute_spec_hash(&cluster.spec);

        if self.observed_workload(key).await?.is_none() {
            return self.create(key, &cluster, &status, desired_hash).await;
        }

        let drifted = status.last_applied_hash.as_deref() != Some(desired_hash.as_str());
        if drifted {
            info!(
                cluster = %key.name,
                previous = status.last_applied_hash.as_deref().unwrap_or("<none>"),
                desired = %desired_hash,
                "Spec drift detected"
            );
            self.ctx.metrics.record_drift(ResourceKind::Cluster);
        }

        self.apply_cheap_collaborators(&cluster).await?;
        self.ctx.platform.apply_secrets(&cluster).await?;

        if drifted {
            return self
                .reapply_workload(key, &cluster, &status, desired_hash)
                .await;
        }

        // Even a healthy cluster is re-checked against the authoritative
        // store: the cached workload may have been deleted since.
        self.check_readiness(key, &cluster, &status).await
    }
}
