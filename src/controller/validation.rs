//! Spec validation for the three resource kinds.
//!
//! A validation failure is terminal for the resource: it is written to status
//! as Error/InvalidSpec (or Failed for a restore) and never retried until the
//! spec changes.

use crate::controller::error::{Error, Result};
use crate::crd::{QdrantClusterSpec, QdrantCollectionSpec, QdrantRestoreSpec};

/// Minimum number of replicas
pub const MIN_REPLICAS: i32 = 1;

/// Validate a QdrantCluster spec
pub fn validate_cluster(spec: &QdrantClusterSpec) -> Result<()> {
    if spec.replicas < MIN_REPLICAS {
        return Err(Error::Validation(format!(
            "replica count {} is below minimum {}",
            spec.replicas, MIN_REPLICAS
        )));
    }

    if spec.image.trim().is_empty() {
        return Err(Error::Validation("image must not be empty".to_string()));
    }

    Ok(())
}

/// Validate a QdrantCollection spec
pub fn validate_collection(spec: &QdrantCollectionSpec) -> Result<()> {
    if spec.cluster_ref.trim().is_empty() {
        return Err(Error::Validation("clusterRef must not be empty".to_string()));
    }

    if spec.vector_size < 1 {
        return Err(Error::Validation(format!(
            "vectorSize {} is below minimum 1",
            spec.vector_size
        )));
    }

    for (field, value) in [
        ("shardNumber", spec.shard_number),
        ("replicationFactor", spec.replication_factor),
        ("writeConsistencyFactor", spec.write_consistency_factor),
    ] {
        if value == Some(0) {
            return Err(Error::Validation(format!("{field} must be at least 1")));
        }
    }

    if let Some(snapshots) = &spec.snapshots {
        if snapshots.schedule.split_whitespace().count() != 5 {
            return Err(Error::Validation(format!(
                "snapshots.schedule {:?} is not a five-field cron expression",
                snapshots.schedule
            )));
        }
        if snapshots.retention < 1 {
            return Err(Error::Validation(
                "snapshots.retention must be at least 1".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate a QdrantRestore spec
pub fn validate_restore(spec: &QdrantRestoreSpec) -> Result<()> {
    for (field, value) in [
        ("clusterRef", &spec.cluster_ref),
        ("collection", &spec.collection),
        ("snapshotLocation", &spec.snapshot_location),
    ] {
        if value.trim().is_empty() {
            return Err(Error::Validation(format!("{field} must not be empty")));
        }
    }

    if let Some(priority) = spec.priority.as_deref()
        && !matches!(priority, "replica" | "snapshot" | "no_sync")
    {
        return Err(Error::Validation(format!(
            "priority {priority:?} must be one of replica, snapshot, no_sync"
        )));
    }

    Ok(())
}
