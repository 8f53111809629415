//! In-memory fakes of the platform and database collaborators.
//!
//! `MockPlatform` keeps the three custom resource kinds and the StatefulSets
//! in maps, records every mutating call, and lets tests script failures and
//! job progress. `MockDatabase` counts health checks and collection upserts.
//! Both are shared with the reconcilers through `Arc`, so a test can keep a
//! handle and inspect what happened after each pass.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube::runtime::events::EventType;

use qdrant_operator::controller::common::{ResourceKey, ResourceKind};
use qdrant_operator::controller::context::{LeaderGate, ReconcileContext};
use qdrant_operator::controller::error::{Error, Result};
use qdrant_operator::crd::{
    QdrantCluster, QdrantClusterSpec, QdrantClusterStatus, QdrantCollection,
    QdrantCollectionSpec, QdrantCollectionStatus, QdrantRestore, QdrantRestoreSpec,
    QdrantRestoreStatus,
};
use qdrant_operator::database::{DatabaseEndpoint, DatabaseOps};
use qdrant_operator::health::Metrics;
use qdrant_operator::platform::{JobState, PlatformOps};

pub const NAMESPACE: &str = "default";

type Name = (String, String);

fn name_of<K: kube::Resource>(obj: &K) -> Name {
    (
        obj.namespace().unwrap_or_else(|| NAMESPACE.to_string()),
        obj.name_any(),
    )
}

/// A published Kubernetes event.
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
}

#[derive(Default)]
pub struct MockState {
    pub clusters: BTreeMap<Name, QdrantCluster>,
    pub collections: BTreeMap<Name, QdrantCollection>,
    pub restores: BTreeMap<Name, QdrantRestore>,
    pub workloads: BTreeMap<Name, StatefulSet>,
    /// Count of each mutating or probing call, keyed by operation name
    pub calls: HashMap<&'static str, usize>,
    pub events: Vec<RecordedEvent>,
    /// Job states returned by successive `read_job_status` calls; the last
    /// one repeats once the script runs out
    pub job_script: VecDeque<Option<JobState>>,
    pub job_default: Option<JobState>,
    /// How long each `read_job_status` call takes to answer
    pub job_read_delay: Duration,
    pub launched_jobs: Vec<String>,
    /// Remaining failures for an operation before it succeeds again
    pub failures: HashMap<&'static str, usize>,
    /// When set, an applied workload reports every replica ready
    pub workloads_become_ready: bool,
    next_resource_version: u64,
}

impl MockState {
    fn bump(&mut self, op: &'static str) {
        *self.calls.entry(op).or_default() += 1;
    }

    fn fail(&mut self, op: &'static str) -> Result<()> {
        match self.failures.get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(Error::Transient(format!("injected {op} failure")))
            }
            _ => Ok(()),
        }
    }

    fn resource_version(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }
}

#[derive(Default)]
pub struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    /// Make `op` fail `times` times before succeeding again.
    pub fn fail_next(&self, op: &'static str, times: usize) {
        self.state().failures.insert(op, times);
    }

    pub fn insert_cluster(&self, mut cluster: QdrantCluster) {
        let mut state = self.state();
        cluster.metadata.generation.get_or_insert(1);
        cluster.metadata.resource_version = Some(state.resource_version());
        state.clusters.insert(name_of(&cluster), cluster);
    }

    pub fn insert_collection(&self, mut collection: QdrantCollection) {
        let mut state = self.state();
        collection.metadata.generation.get_or_insert(1);
        collection.metadata.resource_version = Some(state.resource_version());
        state.collections.insert(name_of(&collection), collection);
    }

    pub fn insert_restore(&self, mut restore: QdrantRestore) {
        let mut state = self.state();
        restore.metadata.generation.get_or_insert(1);
        restore.metadata.resource_version = Some(state.resource_version());
        state.restores.insert(name_of(&restore), restore);
    }

    pub fn cluster(&self, name: &str) -> QdrantCluster {
        self.state().clusters[&(NAMESPACE.to_string(), name.to_string())].clone()
    }

    pub fn cluster_status(&self, name: &str) -> QdrantClusterStatus {
        self.cluster(name).status.unwrap_or_default()
    }

    pub fn collection_status(&self, name: &str) -> QdrantCollectionStatus {
        self.state().collections[&(NAMESPACE.to_string(), name.to_string())]
            .status
            .clone()
            .unwrap_or_default()
    }

    pub fn restore_status(&self, name: &str) -> QdrantRestoreStatus {
        self.state().restores[&(NAMESPACE.to_string(), name.to_string())]
            .status
            .clone()
            .unwrap_or_default()
    }

    /// Change a cluster spec the way the API server does: bump generation.
    pub fn update_cluster_spec(&self, name: &str, update: impl FnOnce(&mut QdrantClusterSpec)) {
        let mut state = self.state();
        let rv = state.resource_version();
        let cluster = state
            .clusters
            .get_mut(&(NAMESPACE.to_string(), name.to_string()))
            .unwrap();
        update(&mut cluster.spec);
        cluster.metadata.generation = Some(cluster.metadata.generation.unwrap_or(1) + 1);
        cluster.metadata.resource_version = Some(rv);
    }

    /// Overwrite a cluster's status directly (e.g. a stale phase).
    pub fn set_cluster_status(&self, name: &str, status: QdrantClusterStatus) {
        let mut state = self.state();
        let cluster = state
            .clusters
            .get_mut(&(NAMESPACE.to_string(), name.to_string()))
            .unwrap();
        cluster.status = Some(status);
    }

    /// Put a StatefulSet in place with the given ready count.
    pub fn set_workload(&self, name: &str, replicas: i32, ready: i32) {
        let workload = StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            status: Some(ready_status(replicas, ready)),
            ..Default::default()
        };
        self.state()
            .workloads
            .insert((NAMESPACE.to_string(), name.to_string()), workload);
    }

    pub fn remove_workload(&self, name: &str) {
        self.state()
            .workloads
            .remove(&(NAMESPACE.to_string(), name.to_string()));
    }

    /// Script the job states returned by successive polls.
    pub fn script_jobs(&self, states: impl IntoIterator<Item = Option<JobState>>) {
        self.state().job_script = states.into_iter().collect();
    }

    pub fn events_with_reason(&self, reason: &str) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| e.reason == reason)
            .count()
    }
}

pub fn ready_status(replicas: i32, ready: i32) -> StatefulSetStatus {
    StatefulSetStatus {
        replicas,
        ready_replicas: Some(ready),
        available_replicas: Some(ready),
        updated_replicas: Some(ready),
        ..Default::default()
    }
}

fn stored<K: Clone>(map: &BTreeMap<Name, K>, namespace: &str, name: &str) -> Option<K> {
    map.get(&(namespace.to_string(), name.to_string())).cloned()
}

#[async_trait]
impl PlatformOps for MockPlatform {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<QdrantCluster>> {
        let mut state = self.state();
        state.fail("get_cluster")?;
        Ok(stored(&state.clusters, namespace, name))
    }

    async fn get_collection(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<QdrantCollection>> {
        let mut state = self.state();
        state.fail("get_collection")?;
        Ok(stored(&state.collections, namespace, name))
    }

    async fn get_restore(&self, namespace: &str, name: &str) -> Result<Option<QdrantRestore>> {
        let mut state = self.state();
        state.fail("get_restore")?;
        Ok(stored(&state.restores, namespace, name))
    }

    async fn list_clusters(&self) -> Result<Vec<QdrantCluster>> {
        let mut state = self.state();
        state.fail("list_clusters")?;
        Ok(state.clusters.values().cloned().collect())
    }

    async fn list_collections(&self) -> Result<Vec<QdrantCollection>> {
        Ok(self.state().collections.values().cloned().collect())
    }

    async fn list_restores(&self) -> Result<Vec<QdrantRestore>> {
        Ok(self.state().restores.values().cloned().collect())
    }

    async fn patch_cluster_status(
        &self,
        cluster: &QdrantCluster,
        status: &QdrantClusterStatus,
    ) -> Result<QdrantCluster> {
        let mut state = self.state();
        state.bump("patch_cluster_status");
        state.fail("patch_cluster_status")?;
        let rv = state.resource_version();
        let entry = state
            .clusters
            .get_mut(&name_of(cluster))
            .ok_or_else(|| Error::Transient("cluster not found".to_string()))?;
        entry.status = Some(status.clone());
        entry.metadata.resource_version = Some(rv);
        Ok(entry.clone())
    }

    async fn patch_collection_status(
        &self,
        collection: &QdrantCollection,
        status: &QdrantCollectionStatus,
    ) -> Result<QdrantCollection> {
        let mut state = self.state();
        state.bump("patch_collection_status");
        let rv = state.resource_version();
        let entry = state
            .collections
            .get_mut(&name_of(collection))
            .ok_or_else(|| Error::Transient("collection not found".to_string()))?;
        entry.status = Some(status.clone());
        entry.metadata.resource_version = Some(rv);
        Ok(entry.clone())
    }

    async fn patch_restore_status(
        &self,
        restore: &QdrantRestore,
        status: &QdrantRestoreStatus,
    ) -> Result<QdrantRestore> {
        let mut state = self.state();
        state.bump("patch_restore_status");
        let rv = state.resource_version();
        let entry = state
            .restores
            .get_mut(&name_of(restore))
            .ok_or_else(|| Error::Transient("restore not found".to_string()))?;
        entry.status = Some(status.clone());
        entry.metadata.resource_version = Some(rv);
        Ok(entry.clone())
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let mut state = self.state();
        state.bump("get_workload");
        Ok(stored(&state.workloads, namespace, name))
    }

    async fn apply_config_map(&self, _cluster: &QdrantCluster) -> Result<()> {
        let mut state = self.state();
        state.bump("apply_config_map");
        state.fail("apply_config_map")
    }

    async fn apply_secrets(&self, _cluster: &QdrantCluster) -> Result<()> {
        self.state().bump("apply_secrets");
        Ok(())
    }

    async fn apply_services(&self, _cluster: &QdrantCluster) -> Result<()> {
        self.state().bump("apply_services");
        Ok(())
    }

    async fn apply_disruption_budget(&self, _cluster: &QdrantCluster) -> Result<()> {
        self.state().bump("apply_disruption_budget");
        Ok(())
    }

    async fn apply_network_policy(&self, _cluster: &QdrantCluster) -> Result<()> {
        self.state().bump("apply_network_policy");
        Ok(())
    }

    async fn apply_workload(&self, cluster: &QdrantCluster) -> Result<StatefulSet> {
        let mut state = self.state();
        state.bump("apply_workload");
        state.fail("apply_workload")?;
        let (namespace, name) = name_of(cluster);
        let replicas = cluster.spec.replicas;
        let ready = if state.workloads_become_ready {
            replicas
        } else {
            0
        };
        let workload = StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            status: Some(ready_status(replicas, ready)),
            ..Default::default()
        };
        state.workloads.insert((namespace, name), workload.clone());
        Ok(workload)
    }

    async fn read_api_key(&self, cluster: &QdrantCluster) -> Result<Option<String>> {
        Ok(cluster
            .spec
            .api_key
            .enabled
            .then(|| "test-api-key".to_string()))
    }

    async fn apply_collection_jobs(
        &self,
        _collection: &QdrantCollection,
        _cluster: &QdrantCluster,
    ) -> Result<()> {
        let mut state = self.state();
        state.bump("apply_collection_jobs");
        state.fail("apply_collection_jobs")
    }

    async fn launch_restore_job(&self, restore: &QdrantRestore) -> Result<String> {
        let mut state = self.state();
        state.bump("launch_restore_job");
        state.fail("launch_restore_job")?;
        let job = format!("{}-restore", restore.name_any());
        state.launched_jobs.push(job.clone());
        Ok(job)
    }

    async fn read_job_status(&self, _namespace: &str, _job_name: &str) -> Result<Option<JobState>> {
        let delay = {
            let mut state = self.state();
            state.bump("read_job_status");
            state.fail("read_job_status")?;
            state.job_read_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        Ok(match state.job_script.pop_front() {
            Some(next) => next,
            None => state.job_default,
        })
    }

    async fn publish_event(
        &self,
        reference: ObjectReference,
        event_type: EventType,
        reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
        self.state().events.push(RecordedEvent {
            object: reference.name.unwrap_or_default(),
            warning: matches!(event_type, EventType::Warning),
            reason: reason.to_string(),
        });
    }
}

/// Database fake: healthy unless told otherwise, records upserts.
#[derive(Default)]
pub struct MockDatabase {
    healthy: Mutex<bool>,
    hang: Mutex<bool>,
    pub health_checks: Mutex<usize>,
    pub upserts: Mutex<Vec<(String, QdrantCollectionSpec, Option<String>)>>,
}

impl MockDatabase {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            healthy: Mutex::new(true),
            ..Default::default()
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock().unwrap() = healthy;
    }

    /// Make health checks never answer.
    pub fn set_hang(&self, hang: bool) {
        *self.hang.lock().unwrap() = hang;
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.lock().unwrap().len()
    }

    pub fn health_check_count(&self) -> usize {
        *self.health_checks.lock().unwrap()
    }
}

#[async_trait]
impl DatabaseOps for MockDatabase {
    async fn health(&self, _endpoint: &DatabaseEndpoint) -> Result<()> {
        *self.health_checks.lock().unwrap() += 1;
        let hang = *self.hang.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        if *self.healthy.lock().unwrap() {
            Ok(())
        } else {
            Err(Error::Database("connection refused".to_string()))
        }
    }

    async fn upsert_collection(
        &self,
        endpoint: &DatabaseEndpoint,
        name: &str,
        spec: &QdrantCollectionSpec,
    ) -> Result<()> {
        self.upserts.lock().unwrap().push((
            name.to_string(),
            spec.clone(),
            endpoint.api_key.clone(),
        ));
        Ok(())
    }
}

/// Everything a functional test needs, wired like production.
pub struct Harness {
    pub platform: Arc<MockPlatform>,
    pub database: Arc<MockDatabase>,
    pub metrics: Arc<Metrics>,
    pub gate: Arc<LeaderGate>,
    pub ctx: Arc<ReconcileContext>,
}

impl Harness {
    pub fn new() -> Self {
        let platform = MockPlatform::new();
        let database = MockDatabase::new();
        let metrics = Arc::new(Metrics::new());
        let gate = Arc::new(LeaderGate::open());
        let ctx = Arc::new(ReconcileContext::new(
            platform.clone(),
            database.clone(),
            metrics.clone(),
            gate.clone(),
        ));
        Self {
            platform,
            database,
            metrics,
            gate,
            ctx,
        }
    }
}

pub fn cluster_key(name: &str) -> ResourceKey {
    ResourceKey::new(ResourceKind::Cluster, NAMESPACE, name)
}

pub fn collection_key(name: &str) -> ResourceKey {
    ResourceKey::new(ResourceKind::Collection, NAMESPACE, name)
}

pub fn restore_key(name: &str) -> ResourceKey {
    ResourceKey::new(ResourceKind::Restore, NAMESPACE, name)
}

pub fn test_cluster(name: &str, replicas: i32) -> QdrantCluster {
    let mut cluster = QdrantCluster::new(
        name,
        QdrantClusterSpec {
            replicas,
            ..Default::default()
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.uid = Some(format!("{name}-uid"));
    cluster
}

pub fn test_collection(name: &str, cluster_ref: &str, vector_size: u64) -> QdrantCollection {
    let mut collection = QdrantCollection::new(
        name,
        QdrantCollectionSpec {
            cluster_ref: cluster_ref.to_string(),
            vector_size,
            distance: Default::default(),
            shard_number: None,
            replication_factor: None,
            write_consistency_factor: None,
            on_disk_payload: None,
            snapshots: None,
        },
    );
    collection.metadata.namespace = Some(NAMESPACE.to_string());
    collection.metadata.uid = Some(format!("{name}-uid"));
    collection
}

pub fn test_restore(name: &str, cluster_ref: &str, collection: &str) -> QdrantRestore {
    let mut restore = QdrantRestore::new(
        name,
        QdrantRestoreSpec {
            cluster_ref: cluster_ref.to_string(),
            collection: collection.to_string(),
            snapshot_location: "http://backups.internal/docs.snapshot".to_string(),
            priority: None,
        },
    );
    restore.metadata.namespace = Some(NAMESPACE.to_string());
    restore.metadata.uid = Some(format!("{name}-uid"));
    restore
}
