//! [`PlatformOps`] backed by the Kubernetes API.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ConfigMap, ObjectReference, Secret, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{JobState, PlatformOps};
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::{Error, Result};
use crate::crd::{
    QdrantCluster, QdrantClusterStatus, QdrantCollection, QdrantCollectionStatus, QdrantRestore,
    QdrantRestoreStatus,
};
use crate::resources::common::{
    API_KEY_SECRET_KEY, api_key_secret_name, generate_api_key, generate_api_key_secret,
    generate_configmap,
};
use crate::resources::{jobs, network_policy, pdb, services, statefulset};
use crate::scoped_api;

fn namespace_of<K: Resource>(obj: &K) -> Result<String> {
    obj.meta()
        .namespace
        .clone()
        .ok_or_else(|| Error::MissingField("metadata.namespace".to_string()))
}

/// Map a 404 to `None`.
fn absent_if_not_found<T>(result: kube::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Kubernetes-backed platform, scoped to one namespace or the whole cluster.
pub struct KubePlatform {
    client: Client,
    namespace: Option<String>,
    job_image: String,
    reporter: Reporter,
}

impl KubePlatform {
    pub fn new(
        client: Client,
        namespace: Option<String>,
        job_image: String,
        instance: Option<String>,
    ) -> Self {
        Self {
            client,
            namespace,
            job_image,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance,
            },
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        absent_if_not_found(self.api::<K>(namespace).get(name).await)
    }

    async fn list<K>(&self) -> Result<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = scoped_api(self.client.clone(), self.namespace.as_deref());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    /// Server-side apply, returning the stored object.
    async fn apply<K>(&self, namespace: &str, object: &K) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let name = object
            .meta()
            .name
            .clone()
            .ok_or_else(|| Error::MissingField("metadata.name".to_string()))?;
        let applied = self
            .api::<K>(namespace)
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(object),
            )
            .await?;
        Ok(applied)
    }

    async fn delete_if_present<K>(&self, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                info!(name = %name, "Deleted {}", K::kind(&Default::default()));
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge-patch the status subresource.
    async fn patch_status<K, S>(&self, object: &K, status: &S) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
        S: Serialize,
    {
        let namespace = namespace_of(object)?;
        let patch = serde_json::json!({ "status": status });
        let updated = self
            .api::<K>(&namespace)
            .patch_status(
                &object.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }
}

/// Job state from its status counters and conditions.
fn job_state(job: &Job) -> JobState {
    let Some(status) = job.status.as_ref() else {
        return JobState::Running;
    };
    let condition = |type_: &str| {
        status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == type_ && c.status == "True")
    };

    if condition("Complete") || status.succeeded.unwrap_or(0) > 0 {
        JobState::Succeeded
    } else if condition("Failed") {
        JobState::Failed
    } else {
        JobState::Running
    }
}

#[async_trait]
impl PlatformOps for KubePlatform {
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<QdrantCluster>> {
        self.get(namespace, name).await
    }

    async fn get_collection(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<QdrantCollection>> {
        self.get(namespace, name).await
    }

    async fn get_restore(&self, namespace: &str, name: &str) -> Result<Option<QdrantRestore>> {
        self.get(namespace, name).await
    }

    async fn list_clusters(&self) -> Result<Vec<QdrantCluster>> {
        self.list().await
    }

    async fn list_collections(&self) -> Result<Vec<QdrantCollection>> {
        self.list().await
    }

    async fn list_restores(&self) -> Result<Vec<QdrantRestore>> {
        self.list().await
    }

    async fn patch_cluster_status(
        &self,
        cluster: &QdrantCluster,
        status: &QdrantClusterStatus,
    ) -> Result<QdrantCluster> {
        self.patch_status(cluster, status).await
    }

    async fn patch_collection_status(
        &self,
        collection: &QdrantCollection,
        status: &QdrantCollectionStatus,
    ) -> Result<QdrantCollection> {
        self.patch_status(collection, status).await
    }

    async fn patch_restore_status(
        &self,
        restore: &QdrantRestore,
        status: &QdrantRestoreStatus,
    ) -> Result<QdrantRestore> {
        self.patch_status(restore, status).await
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        self.get(namespace, name).await
    }

    async fn apply_config_map(&self, cluster: &QdrantCluster) -> Result<()> {
        let namespace = namespace_of(cluster)?;
        self.apply::<ConfigMap>(&namespace, &generate_configmap(cluster))
            .await?;
        Ok(())
    }

    async fn apply_secrets(&self, cluster: &QdrantCluster) -> Result<()> {
        if !cluster.spec.api_key.enabled {
            return Ok(());
        }
        let namespace = namespace_of(cluster)?;
        let name = api_key_secret_name(cluster);
        if self.get::<Secret>(&namespace, &name).await?.is_some() {
            return Ok(());
        }

        let secret = generate_api_key_secret(cluster, &generate_api_key());
        match self
            .api::<Secret>(&namespace)
            .create(&PostParams::default(), &secret)
            .await
        {
            Ok(_) => {
                info!(secret = %name, "Created API key secret");
                Ok(())
            }
            // Lost a race with another writer; the existing key wins
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_services(&self, cluster: &QdrantCluster) -> Result<()> {
        let namespace = namespace_of(cluster)?;
        self.apply::<Service>(&namespace, &services::generate_headless_service(cluster))
            .await?;
        self.apply::<Service>(&namespace, &services::generate_client_service(cluster))
            .await?;
        Ok(())
    }

    async fn apply_disruption_budget(&self, cluster: &QdrantCluster) -> Result<()> {
        let namespace = namespace_of(cluster)?;
        self.apply::<PodDisruptionBudget>(
            &namespace,
            &pdb::generate_pod_disruption_budget(cluster),
        )
        .await?;
        Ok(())
    }

    async fn apply_network_policy(&self, cluster: &QdrantCluster) -> Result<()> {
        let namespace = namespace_of(cluster)?;
        if !cluster.spec.network_policy.enabled {
            return self
                .delete_if_present::<NetworkPolicy>(&namespace, &cluster.name_any())
                .await;
        }
        let policy = network_policy::generate_network_policy(cluster)?;
        self.apply::<NetworkPolicy>(&namespace, &policy).await?;
        Ok(())
    }

    async fn apply_workload(&self, cluster: &QdrantCluster) -> Result<StatefulSet> {
        let namespace = namespace_of(cluster)?;
        let spec_hash = crate::controller::spec_hash::compute_spec_hash(&cluster.spec);
        self.apply(&namespace, &statefulset::generate_statefulset(cluster, &spec_hash))
            .await
    }

    async fn read_api_key(&self, cluster: &QdrantCluster) -> Result<Option<String>> {
        if !cluster.spec.api_key.enabled {
            return Ok(None);
        }
        let namespace = namespace_of(cluster)?;
        let secret = self
            .get::<Secret>(&namespace, &api_key_secret_name(cluster))
            .await?;
        let key = secret
            .and_then(|s| s.data)
            .and_then(|mut data| data.remove(API_KEY_SECRET_KEY))
            .and_then(|bytes| String::from_utf8(bytes.0).ok());
        if key.is_none() {
            warn!(cluster = %cluster.name_any(), "API key enabled but secret has no key");
        }
        Ok(key)
    }

    async fn apply_collection_jobs(
        &self,
        collection: &QdrantCollection,
        cluster: &QdrantCluster,
    ) -> Result<()> {
        let namespace = namespace_of(collection)?;
        match &collection.spec.snapshots {
            Some(schedule) => {
                let cronjob =
                    jobs::generate_snapshot_cronjob(collection, cluster, schedule, &self.job_image);
                self.apply::<CronJob>(&namespace, &cronjob).await?;
                Ok(())
            }
            None => {
                self.delete_if_present::<CronJob>(
                    &namespace,
                    &jobs::snapshot_cronjob_name(collection),
                )
                .await
            }
        }
    }

    async fn launch_restore_job(&self, restore: &QdrantRestore) -> Result<String> {
        let namespace = namespace_of(restore)?;
        let job = jobs::generate_restore_job(restore, &self.job_image);
        let name = jobs::restore_job_name(restore);
        match self
            .api::<Job>(&namespace)
            .create(&PostParams::default(), &job)
            .await
        {
            Ok(_) => info!(job = %name, "Launched restore job"),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!(job = %name, "Restore job already exists")
            }
            Err(e) => return Err(e.into()),
        }
        Ok(name)
    }

    async fn read_job_status(&self, namespace: &str, job_name: &str) -> Result<Option<JobState>> {
        Ok(self
            .get::<Job>(namespace, job_name)
            .await?
            .map(|job| job_state(&job)))
    }

    async fn publish_event(
        &self,
        reference: ObjectReference,
        event_type: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_: event_type,
                    reason: reason.into(),
                    note,
                    action: action.into(),
                    secondary: None,
                },
                &reference,
            )
            .await
        {
            warn!(reason = %reason, error = %e, "Failed to publish event");
        }
    }
}
