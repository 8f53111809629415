//! QdrantCollection Custom Resource Definition.
//!
//! A collection lives inside a QdrantCluster and is created through the
//! database's data-plane API rather than as a Kubernetes workload.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// QdrantCollection declares a collection inside a QdrantCluster.
///
/// Example:
/// ```yaml
/// apiVersion: qdrantoperator.smoketurner.com/v1alpha1
/// kind: QdrantCollection
/// metadata:
///   name: embeddings
/// spec:
///   clusterRef: vectors
///   vectorSize: 768
///   distance: Cosine
///   shardNumber: 2
///   replicationFactor: 2
///   snapshots:
///     schedule: "0 3 * * *"
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "qdrantoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "QdrantCollection",
    plural = "qdrantcollections",
    shortname = "qcol",
    status = "QdrantCollectionStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterRef"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct QdrantCollectionSpec {
    /// Name of the owning QdrantCluster in the same namespace.
    pub cluster_ref: String,

    /// Vector dimension (minimum 1).
    pub vector_size: u64,

    /// Distance metric.
    #[serde(default)]
    pub distance: Distance,

    /// Number of shards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_number: Option<u32>,

    /// Number of replicas per shard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<u32>,

    /// Number of replicas that must acknowledge a write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_consistency_factor: Option<u32>,

    /// Store payloads on disk instead of in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_disk_payload: Option<bool>,

    /// Periodic snapshot schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<SnapshotScheduleSpec>,
}

/// Vector distance metric.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum Distance {
    #[default]
    Cosine,
    Euclid,
    Dot,
    Manhattan,
}

impl std::fmt::Display for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Distance::Cosine => write!(f, "Cosine"),
            Distance::Euclid => write!(f, "Euclid"),
            Distance::Dot => write!(f, "Dot"),
            Distance::Manhattan => write!(f, "Manhattan"),
        }
    }
}

/// Snapshot CronJob configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotScheduleSpec {
    /// Cron schedule for snapshot creation.
    pub schedule: String,

    /// Number of successful job runs to keep (default: 3).
    #[serde(default = "default_retention")]
    pub retention: i32,
}

fn default_retention() -> i32 {
    3
}

/// Status of a QdrantCollection.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QdrantCollectionStatus {
    #[serde(default)]
    pub phase: CollectionPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl QdrantCollectionStatus {
    /// Whether this status is the sticky Error/InvalidSpec state.
    pub fn is_invalid_spec(&self) -> bool {
        self.phase == CollectionPhase::Error
            && self.reason.as_deref() == Some(super::REASON_INVALID_SPEC)
    }
}

/// Lifecycle phase of a QdrantCollection.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum CollectionPhase {
    /// Waiting for validation or for the owning cluster.
    #[default]
    Pending,
    /// Collection exists in the database with the declared parameters.
    Ready,
    /// Reconciliation failed; see reason.
    Error,
}

impl std::fmt::Display for CollectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionPhase::Pending => write!(f, "Pending"),
            CollectionPhase::Ready => write!(f, "Ready"),
            CollectionPhase::Error => write!(f, "Error"),
        }
    }
}
