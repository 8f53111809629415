//! NetworkPolicy generation for Qdrant clusters.
//!
//! Peers may reach each other on every port. Client ports are open to pods
//! in the cluster's own namespace plus any namespaces listed in the spec.

use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicySpec};
use kube::ResourceExt;
use serde_json::{Value, json};

use crate::crd::{GRPC_PORT, HTTP_PORT, P2P_PORT, QdrantCluster};
use crate::resources::common::{owned_metadata, pod_selector_labels};

const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

fn tcp_ports(ports: &[i32]) -> Value {
    ports
        .iter()
        .map(|port| json!({ "port": port, "protocol": "TCP" }))
        .collect()
}

fn namespace_peer(namespace: &str) -> Value {
    json!({
        "namespaceSelector": {
            "matchLabels": { NAMESPACE_NAME_LABEL: namespace }
        }
    })
}

/// Generate the ingress NetworkPolicy for a cluster's pods.
pub fn generate_network_policy(
    resource: &QdrantCluster,
) -> Result<NetworkPolicy, serde_json::Error> {
    let selector = json!({ "matchLabels": pod_selector_labels(resource) });

    let own_namespace = resource.namespace().unwrap_or_default();
    let mut client_sources = vec![namespace_peer(&own_namespace)];
    client_sources.extend(
        resource
            .spec
            .network_policy
            .allowed_namespaces
            .iter()
            .filter(|ns| **ns != own_namespace)
            .map(|ns| namespace_peer(ns)),
    );

    let spec: NetworkPolicySpec = serde_json::from_value(json!({
        "podSelector": selector,
        "policyTypes": ["Ingress"],
        "ingress": [
            {
                "from": [{ "podSelector": selector }],
                "ports": tcp_ports(&[HTTP_PORT, GRPC_PORT, P2P_PORT]),
            },
            {
                "from": client_sources,
                "ports": tcp_ports(&[HTTP_PORT, GRPC_PORT]),
            },
        ],
    }))?;

    Ok(NetworkPolicy {
        metadata: owned_metadata(resource, resource.name_any()),
        spec: Some(spec),
        ..Default::default()
    })
}
