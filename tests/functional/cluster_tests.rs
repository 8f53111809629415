//! QdrantCluster reconciler tests.
//!
//! Each test drives `ClusterReconciler` pass by pass against the in-memory
//! platform and checks status, the calls made, and metrics.

use std::time::Duration;

use qdrant_operator::controller::cluster_reconciler::ClusterReconciler;
use qdrant_operator::controller::common::ResourceKind;
use qdrant_operator::controller::error::Error;
use qdrant_operator::controller::reconciler::{READINESS_RETRY, ReconcileOutcome, Reconciler};
use qdrant_operator::controller::spec_hash::compute_spec_hash;
use qdrant_operator::controller::status::is_condition_true;
use qdrant_operator::crd::{ClusterPhase, REASON_INVALID_SPEC};

use crate::mock_platform::{Harness, cluster_key, test_cluster};

/// Create a cluster whose workload reports ready as soon as it is applied,
/// and reconcile it to Healthy.
async fn healthy_cluster(h: &Harness, name: &str, replicas: i32) -> ClusterReconciler {
    h.platform.state().workloads_become_ready = true;
    h.platform.insert_cluster(test_cluster(name, replicas));
    let reconciler = ClusterReconciler::new(h.ctx.clone());
    let key = cluster_key(name);

    reconciler.reconcile(&key).await.unwrap();
    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);
    assert_eq!(h.platform.cluster_status(name).phase, ClusterPhase::Healthy);
    reconciler
}

// ============================================================================
// Create and readiness
// ============================================================================

#[tokio::test]
async fn test_cluster_create_then_healthy() {
    let h = Harness::new();
    h.platform.insert_cluster(test_cluster("vectors", 3));
    let reconciler = ClusterReconciler::new(h.ctx.clone());
    let key = cluster_key("vectors");

    // Pass 1: everything is created, status records the applied hash
    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Recheck(READINESS_RETRY));

    let status = h.platform.cluster_status("vectors");
    assert_eq!(status.phase, ClusterPhase::Pending);
    let expected_hash = compute_spec_hash(&h.platform.cluster("vectors").spec);
    assert_eq!(status.last_applied_hash.as_deref(), Some(expected_hash.as_str()));
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(h.platform.calls("apply_workload"), 1);
    assert_eq!(h.platform.calls("apply_secrets"), 1);
    assert_eq!(h.platform.calls("apply_services"), 1);
    assert_eq!(h.platform.events_with_reason("Created"), 1);

    // Pass 2: no replicas ready yet
    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Recheck(READINESS_RETRY));
    let status = h.platform.cluster_status("vectors");
    assert_eq!(status.phase, ClusterPhase::OperationInProgress);
    assert_eq!(status.message.as_deref(), Some("0/3 replicas ready"));
    assert!(!is_condition_true(&status.conditions, "Ready"));

    // Pass 3: all replicas ready
    h.platform.set_workload("vectors", 3, 3);
    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);

    let status = h.platform.cluster_status("vectors");
    assert_eq!(status.phase, ClusterPhase::Healthy);
    assert_eq!(status.ready_replicas, 3);
    assert!(is_condition_true(&status.conditions, "Ready"));
    assert_eq!(h.platform.calls("apply_workload"), 1);
    assert_eq!(h.platform.events_with_reason("Healthy"), 1);
}

#[tokio::test]
async fn test_cluster_waiting_status_not_rewritten_when_unchanged() {
    let h = Harness::new();
    h.platform.insert_cluster(test_cluster("vectors", 3));
    let reconciler = ClusterReconciler::new(h.ctx.clone());
    let key = cluster_key("vectors");

    reconciler.reconcile(&key).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();
    let writes = h.platform.calls("patch_cluster_status");

    // Same readiness as last pass: nothing new to say
    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(h.platform.calls("patch_cluster_status"), writes);

    h.platform.set_workload("vectors", 3, 1);
    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(h.platform.calls("patch_cluster_status"), writes + 1);
    assert_eq!(
        h.platform.cluster_status("vectors").message.as_deref(),
        Some("1/3 replicas ready")
    );
}

// ============================================================================
// Drift
// ============================================================================

#[tokio::test]
async fn test_identical_spec_skips_workload() {
    let h = Harness::new();
    let reconciler = healthy_cluster(&h, "vectors", 3).await;
    let writes = h.platform.calls("patch_cluster_status");
    let config_applies = h.platform.calls("apply_config_map");

    let outcome = reconciler.reconcile(&cluster_key("vectors")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert_eq!(h.platform.calls("apply_workload"), 1);
    // Cheap collaborators are re-applied every pass
    assert_eq!(h.platform.calls("apply_config_map"), config_applies + 1);
    assert_eq!(h.platform.calls("patch_cluster_status"), writes);
    assert_eq!(h.platform.events_with_reason("Healthy"), 1);
    assert_eq!(h.metrics.drift_count(ResourceKind::Cluster), 0);
}

#[tokio::test]
async fn test_replica_change_is_drift() {
    let h = Harness::new();
    let reconciler = healthy_cluster(&h, "vectors", 3).await;
    h.platform.state().workloads_become_ready = false;
    let key = cluster_key("vectors");

    h.platform.update_cluster_spec("vectors", |spec| spec.replicas = 5);
    let outcome = reconciler.reconcile(&key).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Recheck(READINESS_RETRY));
    assert_eq!(h.metrics.drift_count(ResourceKind::Cluster), 1);
    assert_eq!(h.platform.calls("apply_workload"), 2);

    let status = h.platform.cluster_status("vectors");
    let expected_hash = compute_spec_hash(&h.platform.cluster("vectors").spec);
    assert_eq!(status.phase, ClusterPhase::OperationInProgress);
    assert_eq!(status.last_applied_hash.as_deref(), Some(expected_hash.as_str()));
    assert_eq!(status.observed_generation, Some(2));
    assert_eq!(h.platform.events_with_reason("SpecApplied"), 1);

    // New peers come up
    h.platform.set_workload("vectors", 5, 5);
    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);
    assert_eq!(h.platform.cluster_status("vectors").ready_replicas, 5);
    assert_eq!(h.platform.calls("apply_workload"), 2);
}

#[tokio::test]
async fn test_missing_hash_counts_as_drift() {
    let h = Harness::new();
    h.platform.insert_cluster(test_cluster("adopted", 1));
    // Workload exists but status has never recorded a hash
    h.platform.set_workload("adopted", 1, 1);
    let reconciler = ClusterReconciler::new(h.ctx.clone());

    let outcome = reconciler.reconcile(&cluster_key("adopted")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Recheck(READINESS_RETRY));
    assert_eq!(h.metrics.drift_count(ResourceKind::Cluster), 1);
    assert_eq!(h.platform.calls("apply_workload"), 1);
    assert!(h.platform.cluster_status("adopted").last_applied_hash.is_some());
}

#[tokio::test]
async fn test_cheap_collaborator_change_is_not_drift() {
    let h = Harness::new();
    let reconciler = healthy_cluster(&h, "vectors", 3).await;

    h.platform.update_cluster_spec("vectors", |spec| {
        spec.network_policy.enabled = true;
        spec.service
            .annotations
            .insert("example.com/lb".to_string(), "internal".to_string());
    });
    let outcome = reconciler.reconcile(&cluster_key("vectors")).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert_eq!(h.metrics.drift_count(ResourceKind::Cluster), 0);
    assert_eq!(h.platform.calls("apply_workload"), 1);
    assert!(h.platform.calls("apply_network_policy") >= 3);
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn test_invalid_spec_is_sticky() {
    let h = Harness::new();
    h.platform.insert_cluster(test_cluster("broken", 0));
    let reconciler = ClusterReconciler::new(h.ctx.clone());
    let key = cluster_key("broken");

    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);

    let status = h.platform.cluster_status("broken");
    assert_eq!(status.phase, ClusterPhase::Error);
    assert_eq!(status.reason.as_deref(), Some(REASON_INVALID_SPEC));
    assert_eq!(h.metrics.validation_error_count(ResourceKind::Cluster), 1);
    assert_eq!(h.platform.events_with_reason(REASON_INVALID_SPEC), 1);
    assert_eq!(h.platform.calls("apply_workload"), 0);

    // Same generation: no writes, no events, no metric
    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);
    assert_eq!(h.platform.calls("patch_cluster_status"), 1);
    assert_eq!(h.metrics.validation_error_count(ResourceKind::Cluster), 1);
    assert_eq!(h.platform.events_with_reason(REASON_INVALID_SPEC), 1);
}

#[tokio::test]
async fn test_invalid_spec_changed_but_still_invalid() {
    let h = Harness::new();
    h.platform.insert_cluster(test_cluster("broken", 0));
    let reconciler = ClusterReconciler::new(h.ctx.clone());
    let key = cluster_key("broken");
    reconciler.reconcile(&key).await.unwrap();

    h.platform
        .update_cluster_spec("broken", |spec| spec.image = String::new());
    let outcome = reconciler.reconcile(&key).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert_eq!(h.platform.calls("patch_cluster_status"), 1);
    assert_eq!(h.metrics.validation_error_count(ResourceKind::Cluster), 1);
}

#[tokio::test]
async fn test_fixed_spec_leaves_invalid_state() {
    let h = Harness::new();
    h.platform.insert_cluster(test_cluster("broken", 0));
    let reconciler = ClusterReconciler::new(h.ctx.clone());
    let key = cluster_key("broken");
    reconciler.reconcile(&key).await.unwrap();

    h.platform.update_cluster_spec("broken", |spec| spec.replicas = 3);
    let outcome = reconciler.reconcile(&key).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Recheck(READINESS_RETRY));
    let status = h.platform.cluster_status("broken");
    assert_eq!(status.phase, ClusterPhase::Pending);
    assert_eq!(status.reason, None);
    assert_eq!(h.platform.calls("apply_workload"), 1);
}

#[tokio::test]
async fn test_stale_workload_status_is_not_healthy() {
    let h = Harness::new();
    h.platform.insert_cluster(test_cluster("vectors", 3));
    let reconciler = ClusterReconciler::new(h.ctx.clone());
    let key = cluster_key("vectors");
    reconciler.reconcile(&key).await.unwrap();

    // Counters look complete, but they belong to the previous template
    h.platform.set_workload("vectors", 3, 3);
    {
        let mut state = h.platform.state();
        let workload = state.workloads.values_mut().next().unwrap();
        workload.metadata.generation = Some(2);
        workload.status.as_mut().unwrap().observed_generation = Some(1);
    }

    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Recheck(READINESS_RETRY));
    let status = h.platform.cluster_status("vectors");
    assert_eq!(status.phase, ClusterPhase::OperationInProgress);
    assert_eq!(
        status.message.as_deref(),
        Some("3/3 replicas ready, rollout pending")
    );

    h.platform.set_workload("vectors", 3, 3);
    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Done);
    assert_eq!(h.platform.cluster_status("vectors").phase, ClusterPhase::Healthy);
}

// ============================================================================
// Missing objects and failures
// ============================================================================

#[tokio::test]
async fn test_missing_workload_is_recreated() {
    let h = Harness::new();
    h.platform.insert_cluster(test_cluster("vectors", 3));
    let reconciler = ClusterReconciler::new(h.ctx.clone());
    let key = cluster_key("vectors");
    reconciler.reconcile(&key).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();

    // Someone deletes the StatefulSet; the cache still has it
    h.platform.remove_workload("vectors");
    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Recheck(Duration::ZERO));
    assert!(h.ctx.workloads.get(&key).is_none());

    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Recheck(READINESS_RETRY));
    assert_eq!(h.platform.calls("apply_workload"), 2);
    assert_eq!(h.platform.events_with_reason("Created"), 2);
}

#[tokio::test]
async fn test_healthy_cluster_recreates_workload_missing_from_store() {
    let h = Harness::new();
    let reconciler = healthy_cluster(&h, "vectors", 3).await;
    let key = cluster_key("vectors");

    // Deleted while the watch was away: the cache still holds it
    h.platform.remove_workload("vectors");
    assert!(h.ctx.workloads.get(&key).is_some());

    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Recheck(Duration::ZERO));
    assert!(h.ctx.workloads.get(&key).is_none());

    reconciler.reconcile(&key).await.unwrap();
    assert_eq!(h.platform.calls("apply_workload"), 2);
    assert_eq!(h.platform.state().workloads.len(), 1);
    assert!(h.ctx.workloads.get(&key).is_some());
}

#[tokio::test]
async fn test_deleted_cluster_clears_caches() {
    let h = Harness::new();
    let reconciler = healthy_cluster(&h, "vectors", 1).await;
    let key = cluster_key("vectors");
    assert!(h.ctx.clusters.get(&key).is_some());

    h.platform.state().clusters.clear();
    let outcome = reconciler.reconcile(&key).await.unwrap();

    assert_eq!(outcome, ReconcileOutcome::Done);
    assert!(h.ctx.clusters.get(&key).is_none());
    assert!(h.ctx.workloads.get(&key).is_none());
}

#[tokio::test]
async fn test_create_failure_writes_no_status() {
    let h = Harness::new();
    h.platform.insert_cluster(test_cluster("vectors", 3));
    h.platform.fail_next("apply_config_map", 1);
    let reconciler = ClusterReconciler::new(h.ctx.clone());
    let key = cluster_key("vectors");

    let result = reconciler.reconcile(&key).await;

    assert!(matches!(result, Err(Error::Transient(_))));
    assert_eq!(h.platform.calls("patch_cluster_status"), 0);
    assert_eq!(h.platform.calls("apply_workload"), 0);

    // Next pass succeeds and takes the create path
    let outcome = reconciler.reconcile(&key).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Recheck(READINESS_RETRY));
    assert_eq!(h.platform.calls("apply_workload"), 1);
}
