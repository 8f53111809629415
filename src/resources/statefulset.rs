//! StatefulSet generation for Qdrant clusters.
//!
//! Creates a StatefulSet with:
//! - Stable peer identity via the headless service
//! - Peer 0 as the bootstrap node, every other peer joining through it
//! - Config overrides from the ConfigMap and the API key from its Secret
//! - A PVC template for collection storage
//!
//! The spec hash is stamped on the pod template so config-only changes roll
//! the pods.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, EnvVar,
    EnvVarSource, HTTPGetAction, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecretKeySelector, SecurityContext, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::{GRPC_PORT, HTTP_PORT, P2P_PORT, QdrantCluster, ResourceSpec};
use crate::resources::common::{
    API_KEY_SECRET_KEY, SPEC_HASH_ANNOTATION, api_key_secret_name, config_map_name,
    headless_service_name, owned_metadata, pod_selector_labels, standard_labels,
};

/// Qdrant user ID in the official container image
const QDRANT_USER_ID: i64 = 1000;
/// Grace period for flushing WAL segments on shutdown
const TERMINATION_GRACE_PERIOD: i64 = 30;
/// Mount path of the storage volume
const STORAGE_PATH: &str = "/qdrant/storage";

/// Generate a StatefulSet for a QdrantCluster, stamped with `spec_hash`.
pub fn generate_statefulset(resource: &QdrantCluster, spec_hash: &str) -> StatefulSet {
    let mut metadata = owned_metadata(resource, resource.name_any());
    let mut annotations = BTreeMap::new();
    annotations.insert(SPEC_HASH_ANNOTATION.to_string(), spec_hash.to_string());
    metadata.annotations = Some(annotations.clone());

    StatefulSet {
        metadata,
        spec: Some(StatefulSetSpec {
            replicas: Some(resource.spec.replicas),
            service_name: Some(headless_service_name(resource)),
            selector: LabelSelector {
                match_labels: Some(pod_selector_labels(resource)),
                ..Default::default()
            },
            // Peers find each other through DNS, so start them together
            pod_management_policy: Some("Parallel".to_string()),
            template: generate_pod_template(resource, annotations),
            volume_claim_templates: Some(vec![generate_pvc_template(resource)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_pod_template(
    resource: &QdrantCluster,
    annotations: BTreeMap<String, String>,
) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(standard_labels(resource)),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                run_as_user: Some(QDRANT_USER_ID),
                fs_group: Some(QDRANT_USER_ID),
                ..Default::default()
            }),
            containers: vec![generate_qdrant_container(resource)],
            ..Default::default()
        }),
    }
}

/// Startup command. Peer 0 bootstraps the cluster; the others join it.
fn bootstrap_command(resource: &QdrantCluster) -> String {
    let name = resource.name_any();
    let headless = headless_service_name(resource);
    format!(
        "ORDINAL=${{POD_NAME##*-}}; \
         URI=\"http://${{POD_NAME}}.{headless}:{P2P_PORT}\"; \
         if [ \"$ORDINAL\" = \"0\" ]; then exec ./entrypoint.sh --uri \"$URI\"; \
         else exec ./entrypoint.sh --bootstrap \"http://{name}-0.{headless}:{P2P_PORT}\" --uri \"$URI\"; fi"
    )
}

fn generate_env_vars(resource: &QdrantCluster) -> Vec<EnvVar> {
    let mut env = vec![EnvVar {
        name: "POD_NAME".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "metadata.name".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }];

    if resource.spec.api_key.enabled {
        env.push(EnvVar {
            name: "QDRANT__SERVICE__API_KEY".to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: api_key_secret_name(resource),
                    key: API_KEY_SECRET_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    env
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        container_port: port,
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

fn generate_qdrant_container(resource: &QdrantCluster) -> Container {
    Container {
        name: "qdrant".to_string(),
        image: Some(resource.spec.image.clone()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![bootstrap_command(resource)]),
        ports: Some(vec![
            container_port("http", HTTP_PORT),
            container_port("grpc", GRPC_PORT),
            container_port("p2p", P2P_PORT),
        ]),
        env: Some(generate_env_vars(resource)),
        env_from: Some(vec![EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: config_map_name(resource),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        resources: generate_resource_requirements(resource),
        volume_mounts: Some(vec![VolumeMount {
            name: "storage".to_string(),
            mount_path: STORAGE_PATH.to_string(),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        readiness_probe: Some(http_probe("/readyz", 5)),
        liveness_probe: Some(http_probe("/livez", 10)),
        ..Default::default()
    }
}

fn http_probe(path: &str, period_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String("http".to_string()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(3),
        failure_threshold: Some(6),
        ..Default::default()
    }
}

fn quantities(spec: &ResourceSpec) -> Option<BTreeMap<String, Quantity>> {
    let mut map = BTreeMap::new();
    if let Some(cpu) = &spec.cpu {
        map.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &spec.memory {
        map.insert("memory".to_string(), Quantity(memory.clone()));
    }
    (!map.is_empty()).then_some(map)
}

fn generate_resource_requirements(resource: &QdrantCluster) -> Option<ResourceRequirements> {
    let resources = resource.spec.resources.as_ref()?;
    Some(ResourceRequirements {
        requests: quantities(&resources.requests),
        limits: quantities(&resources.limits),
        ..Default::default()
    })
}

fn generate_pvc_template(resource: &QdrantCluster) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert(
        "storage".to_string(),
        Quantity(resource.spec.persistence.size.clone()),
    );

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("storage".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: resource.spec.persistence.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::get_unwrap
)]
mod tests {
    use super::*;
    use crate::crd::ResourceRequirementsSpec;
    use crate::resources::common::tests::test_cluster;

    #[test]
    fn test_statefulset_shape() {
        let mut cluster = test_cluster("vectors");
        cluster.spec.replicas = 3;
        let sts = generate_statefulset(&cluster, "abc123");

        assert_eq!(sts.metadata.name.as_deref(), Some("vectors"));
        assert_eq!(
            sts.metadata.annotations.as_ref().unwrap()[SPEC_HASH_ANNOTATION],
            "abc123"
        );

        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.service_name.as_deref(), Some("vectors-headless"));
        assert_eq!(spec.volume_claim_templates.unwrap().len(), 1);

        let template_annotations = spec.template.metadata.unwrap().annotations.unwrap();
        assert_eq!(template_annotations[SPEC_HASH_ANNOTATION], "abc123");

        let container = &spec.template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("qdrant/qdrant:v1.12.4"));
        assert_eq!(container.ports.as_ref().unwrap().len(), 3);
        let env_from = container.env_from.as_ref().unwrap();
        assert_eq!(
            env_from[0].config_map_ref.as_ref().unwrap().name,
            "vectors-config"
        );
    }

    #[test]
    fn test_api_key_env_only_when_enabled() {
        let mut cluster = test_cluster("vectors");
        let env = generate_env_vars(&cluster);
        assert!(!env.iter().any(|e| e.name == "QDRANT__SERVICE__API_KEY"));

        cluster.spec.api_key.enabled = true;
        let env = generate_env_vars(&cluster);
        let api_key = env
            .iter()
            .find(|e| e.name == "QDRANT__SERVICE__API_KEY")
            .unwrap();
        let selector = api_key
            .value_from
            .as_ref()
            .unwrap()
            .secret_key_ref
            .as_ref()
            .unwrap();
        assert_eq!(selector.name, "vectors-api-key");
    }

    #[test]
    fn test_bootstrap_command_targets_first_peer() {
        let cluster = test_cluster("vectors");
        let command = bootstrap_command(&cluster);
        assert!(command.contains("--bootstrap \"http://vectors-0.vectors-headless:6335\""));
        assert!(command.contains("${POD_NAME##*-}"));
    }

    #[test]
    fn test_resource_requirements() {
        let mut cluster = test_cluster("vectors");
        assert!(generate_resource_requirements(&cluster).is_none());

        cluster.spec.resources = Some(ResourceRequirementsSpec {
            requests: ResourceSpec {
                cpu: Some("500m".to_string()),
                memory: None,
            },
            limits: ResourceSpec::default(),
        });
        let requirements = generate_resource_requirements(&cluster).unwrap();
        assert_eq!(requirements.requests.unwrap()["cpu"].0, "500m");
        assert!(requirements.limits.is_none());
    }

    #[test]
    fn test_pvc_template() {
        let mut cluster = test_cluster("vectors");
        cluster.spec.persistence.size = "50Gi".to_string();
        cluster.spec.persistence.storage_class_name = Some("fast".to_string());

        let pvc = generate_pvc_template(&cluster);
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(
            spec.resources.unwrap().requests.unwrap()["storage"].0,
            "50Gi"
        );
    }
}
