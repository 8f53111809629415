//! PodDisruptionBudget generation for Qdrant clusters.
//!
//! Keeps a majority of peers up during voluntary disruptions such as node
//! drains, so consensus survives.

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::QdrantCluster;
use crate::resources::common::{owned_metadata, pod_selector_labels};

/// maxUnavailable for a cluster of `replicas` peers.
///
/// floor((n - 1) / 2) keeps a majority available. A single peer gets 1 so
/// node drains are not blocked forever.
pub fn max_unavailable(replicas: i32) -> i32 {
    if replicas <= 1 {
        1
    } else {
        (replicas - 1) / 2
    }
}

/// Generate a PodDisruptionBudget for a QdrantCluster.
pub fn generate_pod_disruption_budget(resource: &QdrantCluster) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: owned_metadata(resource, resource.name_any()),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(max_unavailable(resource.spec.replicas))),
            selector: Some(LabelSelector {
                match_labels: Some(pod_selector_labels(resource)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
