//! Common resource generation utilities.
//!
//! Provides labels, owner references, resource names, and the small
//! ConfigMap and Secret bodies shared by the other generators.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::QdrantCluster;

/// Value of the `app.kubernetes.io/managed-by` label
pub const MANAGED_BY: &str = "qdrant-operator";

/// Key holding the API key inside the API key secret
pub const API_KEY_SECRET_KEY: &str = "api-key";

/// Annotation recording the spec hash a workload was applied from
pub const SPEC_HASH_ANNOTATION: &str = "qdrantoperator.smoketurner.com/spec-hash";

/// Standard labels applied to all managed resources
pub fn standard_labels(resource: &QdrantCluster) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "qdrant".to_string());
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        resource.name_any(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        "database".to_string(),
    );

    // Merge user-defined labels
    for (key, value) in &resource.spec.labels {
        labels.insert(key.clone(), value.clone());
    }

    labels
}

/// Labels used to select the pods of a cluster. Never includes user labels,
/// so changing them does not orphan pods.
pub fn pod_selector_labels(resource: &QdrantCluster) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "qdrant".to_string());
    labels.insert(
        "app.kubernetes.io/instance".to_string(),
        resource.name_any(),
    );
    labels
}

/// Controller owner reference pointing at any custom resource of this crate
pub fn owner_reference<K>(resource: &K) -> OwnerReference
where
    K: Resource<DynamicType = ()>,
{
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: resource.name_any(),
        uid: resource.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata shared by every object owned by a cluster
pub fn owned_metadata(resource: &QdrantCluster, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: resource.namespace(),
        labels: Some(standard_labels(resource)),
        owner_references: Some(vec![owner_reference(resource)]),
        ..Default::default()
    }
}

/// Name of the headless service used for peer discovery
pub fn headless_service_name(resource: &QdrantCluster) -> String {
    format!("{}-headless", resource.name_any())
}

/// Name of the client service
pub fn client_service_name(resource: &QdrantCluster) -> String {
    resource.name_any()
}

pub fn config_map_name(resource: &QdrantCluster) -> String {
    format!("{}-config", resource.name_any())
}

pub fn api_key_secret_name(resource: &QdrantCluster) -> String {
    format!("{}-api-key", resource.name_any())
}

/// Translate a dotted config path to Qdrant's environment variable form,
/// e.g. `storage.performance.max_search_threads` to
/// `QDRANT__STORAGE__PERFORMANCE__MAX_SEARCH_THREADS`.
pub fn config_env_name(path: &str) -> String {
    let segments: Vec<String> = path
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_uppercase())
        .collect();
    format!("QDRANT__{}", segments.join("__"))
}

/// Generate the ConfigMap of environment overrides consumed by the pods
pub fn generate_configmap(resource: &QdrantCluster) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert("QDRANT__CLUSTER__ENABLED".to_string(), "true".to_string());
    for (path, value) in &resource.spec.config {
        data.insert(config_env_name(path), value.clone());
    }

    ConfigMap {
        metadata: owned_metadata(resource, config_map_name(resource)),
        data: Some(data),
        ..Default::default()
    }
}

/// Generate the API key Secret around an existing or freshly generated key
pub fn generate_api_key_secret(resource: &QdrantCluster, api_key: &str) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(
        API_KEY_SECRET_KEY.to_string(),
        ByteString(api_key.as_bytes().to_vec()),
    );

    Secret {
        metadata: owned_metadata(resource, api_key_secret_name(resource)),
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Generate a new random API key
pub fn generate_api_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
