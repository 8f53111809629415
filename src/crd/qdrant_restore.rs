//! QdrantRestore Custom Resource Definition.
//!
//! A restore recovers one collection of a QdrantCluster from a snapshot by
//! running a one-shot Job. Completed and Failed are terminal: a new
//! QdrantRestore must be created to try again.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// QdrantRestore recovers a collection from a snapshot.
///
/// Example:
/// ```yaml
/// apiVersion: qdrantoperator.smoketurner.com/v1alpha1
/// kind: QdrantRestore
/// metadata:
///   name: embeddings-20260101
/// spec:
///   clusterRef: vectors
///   collection: embeddings
///   snapshotLocation: https://backups.example.com/embeddings-20260101.snapshot
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "qdrantoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "QdrantRestore",
    plural = "qdrantrestores",
    shortname = "qr",
    status = "QdrantRestoreStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterRef"}"#,
    printcolumn = r#"{"name":"Collection", "type":"string", "jsonPath":".spec.collection"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct QdrantRestoreSpec {
    /// Name of the target QdrantCluster in the same namespace.
    pub cluster_ref: String,

    /// Collection to recover.
    pub collection: String,

    /// URL (http(s) or file://) the database recovers the snapshot from.
    pub snapshot_location: String,

    /// Recovery priority passed to the database (replica, snapshot or no_sync).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

/// Status of a QdrantRestore.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QdrantRestoreStatus {
    #[serde(default)]
    pub phase: RestorePhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Error text from the failure that ended the restore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// Name of the Job performing the restore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Lifecycle phase of a QdrantRestore.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum RestorePhase {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RestorePhase {
    /// Completed and Failed accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RestorePhase::Completed | RestorePhase::Failed)
    }
}

impl std::fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestorePhase::Pending => write!(f, "Pending"),
            RestorePhase::InProgress => write!(f, "InProgress"),
            RestorePhase::Completed => write!(f, "Completed"),
            RestorePhase::Failed => write!(f, "Failed"),
        }
    }
}
