//! Platform operations used by the reconcilers.
//!
//! The reconcilers never talk to the Kubernetes API directly. Everything they
//! read or mutate goes through [`PlatformOps`], which keeps them testable with
//! in-memory fakes and keeps manifest generation out of the state machines.

mod kube_platform;

pub use kube_platform::KubePlatform;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;

use crate::controller::error::Result;
use crate::crd::{
    QdrantCluster, QdrantClusterStatus, QdrantCollection, QdrantCollectionStatus, QdrantRestore,
    QdrantRestoreStatus,
};

/// Observed state of a one-shot Job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

/// Reads and writes against the authoritative store.
///
/// Getters return `Ok(None)` when the object does not exist; every other API
/// failure is an error. Apply methods are idempotent.
#[async_trait]
pub trait PlatformOps: Send + Sync {
    /// Get a QdrantCluster by namespace and name
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<QdrantCluster>>;

    /// Get a QdrantCollection by namespace and name
    async fn get_collection(&self, namespace: &str, name: &str)
    -> Result<Option<QdrantCollection>>;

    /// Get a QdrantRestore by namespace and name
    async fn get_restore(&self, namespace: &str, name: &str) -> Result<Option<QdrantRestore>>;

    async fn list_clusters(&self) -> Result<Vec<QdrantCluster>>;
    async fn list_collections(&self) -> Result<Vec<QdrantCollection>>;
    async fn list_restores(&self) -> Result<Vec<QdrantRestore>>;

    /// Write the status subresource of a cluster, returning the updated object
    async fn patch_cluster_status(
        &self,
        cluster: &QdrantCluster,
        status: &QdrantClusterStatus,
    ) -> Result<QdrantCluster>;

    async fn patch_collection_status(
        &self,
        collection: &QdrantCollection,
        status: &QdrantCollectionStatus,
    ) -> Result<QdrantCollection>;

    async fn patch_restore_status(
        &self,
        restore: &QdrantRestore,
        status: &QdrantRestoreStatus,
    ) -> Result<QdrantRestore>;

    /// Get the StatefulSet backing a cluster
    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;

    async fn apply_config_map(&self, cluster: &QdrantCluster) -> Result<()>;

    /// Ensure the API key secret exists. Content-idempotent: an existing key
    /// is never rotated.
    async fn apply_secrets(&self, cluster: &QdrantCluster) -> Result<()>;

    /// Apply the headless and client services
    async fn apply_services(&self, cluster: &QdrantCluster) -> Result<()>;

    async fn apply_disruption_budget(&self, cluster: &QdrantCluster) -> Result<()>;

    /// Apply or remove the network policy depending on the spec
    async fn apply_network_policy(&self, cluster: &QdrantCluster) -> Result<()>;

    /// Apply the StatefulSet, returning the object the API server stored
    async fn apply_workload(&self, cluster: &QdrantCluster) -> Result<StatefulSet>;

    /// Read the data-plane API key of a cluster, if one is configured
    async fn read_api_key(&self, cluster: &QdrantCluster) -> Result<Option<String>>;

    /// Apply (or remove) the periodic snapshot CronJob of a collection
    async fn apply_collection_jobs(
        &self,
        collection: &QdrantCollection,
        cluster: &QdrantCluster,
    ) -> Result<()>;

    /// Create the restore Job, returning its name. Re-launching an existing
    /// Job returns the same name.
    async fn launch_restore_job(&self, restore: &QdrantRestore) -> Result<String>;

    /// Read a Job's state; `None` while the Job is not visible yet
    async fn read_job_status(&self, namespace: &str, job_name: &str) -> Result<Option<JobState>>;

    /// Publish a Kubernetes event. Failures are logged, never returned.
    async fn publish_event(
        &self,
        reference: ObjectReference,
        event_type: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}
