//! Service generation for Qdrant clusters.
//!
//! Creates two services:
//! - **Headless Service**: Peer discovery and stable network identity
//! - **Client Service**: REST and gRPC access with load balancing

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::crd::{GRPC_PORT, HTTP_PORT, P2P_PORT, QdrantCluster};
use crate::resources::common::{
    client_service_name, headless_service_name, owned_metadata, pod_selector_labels,
};

fn port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        port,
        target_port: Some(IntOrString::String(name.to_string())),
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Generate a headless Service for peer discovery.
///
/// `publishNotReadyAddresses` lets peers resolve each other while the
/// cluster is still forming.
pub fn generate_headless_service(resource: &QdrantCluster) -> Service {
    let mut metadata = owned_metadata(resource, headless_service_name(resource));
    if let Some(labels) = metadata.labels.as_mut() {
        labels.insert(
            "app.kubernetes.io/service-type".to_string(),
            "headless".to_string(),
        );
    }

    Service {
        metadata,
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(pod_selector_labels(resource)),
            ports: Some(vec![
                port("http", HTTP_PORT),
                port("grpc", GRPC_PORT),
                port("p2p", P2P_PORT),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Generate the client Service. Type and annotations come from the spec;
/// the peer-to-peer port is never exposed here.
pub fn generate_client_service(resource: &QdrantCluster) -> Service {
    let mut metadata = owned_metadata(resource, client_service_name(resource));
    if let Some(labels) = metadata.labels.as_mut() {
        labels.insert(
            "app.kubernetes.io/service-type".to_string(),
            "client".to_string(),
        );
    }
    let annotations = &resource.spec.service.annotations;
    if !annotations.is_empty() {
        metadata.annotations = Some(annotations.clone());
    }

    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some(resource.spec.service.service_type.clone()),
            selector: Some(pod_selector_labels(resource)),
            ports: Some(vec![port("http", HTTP_PORT), port("grpc", GRPC_PORT)]),
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
    use crate::resources::common::tests::test_cluster;

    #[test]
    fn test_headless_service() {
        let cluster = test_cluster("vectors");
        let svc = generate_headless_service(&cluster);

        assert_eq!(svc.metadata.name.as_deref(), Some("vectors-headless"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.publish_not_ready_addresses, Some(true));

        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 3);
        assert!(ports.iter().any(|p| p.port == P2P_PORT));
    }

    #[test]
    fn test_client_service_uses_spec_type_and_annotations() {
        let mut cluster = test_cluster("vectors");
        cluster.spec.service.service_type = "LoadBalancer".to_string();
        cluster.spec.service.annotations.insert(
            "service.beta.kubernetes.io/aws-load-balancer-internal".to_string(),
            "true".to_string(),
        );

        let svc = generate_client_service(&cluster);
        assert_eq!(svc.metadata.name.as_deref(), Some("vectors"));
        assert!(svc.metadata.annotations.is_some());

        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 2);
        assert!(ports.iter().all(|p| p.port != P2P_PORT));
    }

    #[test]
    fn test_client_service_default_type() {
        let cluster = test_cluster("vectors");
        let svc = generate_client_service(&cluster);
        assert!(svc.metadata.annotations.is_none());
        assert_eq!(svc.spec.unwrap().type_.as_deref(), Some("ClusterIP"));
    }
}
