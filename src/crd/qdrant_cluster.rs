//! QdrantCluster Custom Resource Definition.
//!
//! Defines the QdrantCluster CRD for deploying Qdrant as a StatefulSet with
//! its dependent config, secrets, services, disruption budget and network
//! policy.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// QdrantCluster is a custom resource for deploying Qdrant clusters.
///
/// Example:
/// ```yaml
/// apiVersion: qdrantoperator.smoketurner.com/v1alpha1
/// kind: QdrantCluster
/// metadata:
///   name: vectors
/// spec:
///   replicas: 3
///   image: qdrant/qdrant:v1.12.4
///   persistence:
///     size: 20Gi
///   apiKey:
///     enabled: true
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "qdrantoperator.smoketurner.com",
    version = "v1alpha1",
    kind = "QdrantCluster",
    plural = "qdrantclusters",
    shortname = "qc",
    status = "QdrantClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct QdrantClusterSpec {
    /// Number of Qdrant peers (minimum 1).
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Container image including tag.
    #[serde(default = "default_image")]
    pub image: String,

    /// Resource requests and limits for Qdrant pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirementsSpec>,

    /// Persistent storage for collection data.
    #[serde(default)]
    pub persistence: PersistenceSpec,

    /// Qdrant configuration overrides, rendered into the config map.
    /// Keys are dotted config paths (e.g. `storage.performance.max_search_threads`).
    #[serde(default)]
    pub config: BTreeMap<String, String>,

    /// API key authentication.
    #[serde(default)]
    pub api_key: ApiKeySpec,

    /// Client service configuration.
    #[serde(default)]
    pub service: ServiceSpec,

    /// Network policy restricting ingress to the cluster pods.
    #[serde(default)]
    pub network_policy: NetworkPolicySpec,

    /// Additional labels to apply to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for QdrantClusterSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            image: default_image(),
            resources: None,
            persistence: PersistenceSpec::default(),
            config: BTreeMap::new(),
            api_key: ApiKeySpec::default(),
            service: ServiceSpec::default(),
            network_policy: NetworkPolicySpec::default(),
            labels: BTreeMap::new(),
        }
    }
}

fn default_replicas() -> i32 {
    1
}

fn default_image() -> String {
    "qdrant/qdrant:v1.12.4".to_string()
}

/// Resource requests and limits for Qdrant pods.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// CPU and memory requests.
    #[serde(default)]
    pub requests: ResourceSpec,

    /// CPU and memory limits.
    #[serde(default)]
    pub limits: ResourceSpec,
}

/// CPU and memory quantities.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

/// Persistence configuration.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    /// Size of the PersistentVolumeClaim (default: 10Gi).
    #[serde(default = "default_storage_size")]
    pub size: String,

    /// Storage class name. If not set, uses cluster default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

impl Default for PersistenceSpec {
    fn default() -> Self {
        Self {
            size: default_storage_size(),
            storage_class_name: None,
        }
    }
}

fn default_storage_size() -> String {
    "10Gi".to_string()
}

/// API key configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySpec {
    /// Generate an API key secret and require it on the data-plane API.
    #[serde(default)]
    pub enabled: bool,
}

/// Client service configuration.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Service type (default: ClusterIP).
    #[serde(default = "default_service_type", rename = "type")]
    pub service_type: String,

    /// Annotations for the client service.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            annotations: BTreeMap::new(),
        }
    }
}

fn default_service_type() -> String {
    "ClusterIP".to_string()
}

/// Network policy configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicySpec {
    /// Restrict ingress to peers and the allowed namespaces.
    #[serde(default)]
    pub enabled: bool,

    /// Namespaces allowed to reach the client ports.
    #[serde(default)]
    pub allowed_namespaces: Vec<String>,
}

/// Status of a QdrantCluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QdrantClusterStatus {
    /// Current phase of the cluster lifecycle.
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Machine-readable reason for the current phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable detail for the current phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Conditions describing the current state.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Digest of the spec fields last applied to the workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied_hash: Option<String>,

    /// resourceVersion of the object this status was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,

    /// Number of ready peers observed on the workload.
    #[serde(default)]
    pub ready_replicas: i32,

    /// The generation most recently observed by the controller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl QdrantClusterStatus {
    /// Whether this status is the sticky Error/InvalidSpec state.
    pub fn is_invalid_spec(&self) -> bool {
        self.phase == ClusterPhase::Error && self.reason.as_deref() == Some(REASON_INVALID_SPEC)
    }
}

/// ClusterPhase represents the current lifecycle phase of a QdrantCluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ClusterPhase {
    /// Resources created, waiting for the workload to become ready.
    #[default]
    Pending,
    /// A rollout or readiness wait is in progress.
    OperationInProgress,
    /// All peers are available, updated and ready.
    Healthy,
    /// Workload is running; treated as ready by dependents.
    Running,
    /// Reconciliation failed; see reason.
    Error,
}

impl ClusterPhase {
    /// Whether dependents may treat the cluster as serving traffic.
    pub fn is_ready(&self) -> bool {
        matches!(self, ClusterPhase::Healthy | ClusterPhase::Running)
    }
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::Pending => write!(f, "Pending"),
            ClusterPhase::OperationInProgress => write!(f, "OperationInProgress"),
            ClusterPhase::Healthy => write!(f, "Healthy"),
            ClusterPhase::Running => write!(f, "Running"),
            ClusterPhase::Error => write!(f, "Error"),
        }
    }
}

/// Reason recorded with the sticky validation failure state.
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";

/// Condition describes the state of a resource at a certain point.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Ready", ready, reason, message, generation)
    }

    /// Create a "Reconciling" condition.
    pub fn reconciling(
        reconciling: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new("Reconciling", reconciling, reason, message, generation)
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new("Degraded", degraded, reason, message, generation)
    }
}

/// Qdrant HTTP API port.
pub const HTTP_PORT: i32 = 6333;

/// Qdrant gRPC API port.
pub const GRPC_PORT: i32 = 6334;

/// Qdrant peer-to-peer (raft) port.
pub const P2P_PORT: i32 = 6335;
