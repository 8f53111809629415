//! Stable digest over the workload-relevant fields of a QdrantCluster spec.
//!
//! The digest is stored as `status.lastAppliedHash`. Equal digests let the
//! reconciler skip re-applying the StatefulSet; they never prove the
//! workload is correct.

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::crd::QdrantClusterSpec;

/// Compute the spec hash for a cluster.
///
/// Only fields that end up in the pod template are included: replicas, image,
/// resources, persistence, config, labels and whether the API key is
/// mounted. Missing optional fields hash as their canonical default, and
/// map-valued fields are ordered by key, so two specs with the same content
/// always produce the same digest.
pub fn compute_spec_hash(spec: &QdrantClusterSpec) -> String {
    let resources = spec.resources.clone().unwrap_or_default();

    // serde_json::Map is a BTreeMap here, so object keys serialize sorted.
    let canonical = json!({
        "replicas": spec.replicas,
        "image": spec.image,
        "resources": {
            "requests": {
                "cpu": resources.requests.cpu.unwrap_or_default(),
                "memory": resources.requests.memory.unwrap_or_default(),
            },
            "limits": {
                "cpu": resources.limits.cpu.unwrap_or_default(),
                "memory": resources.limits.memory.unwrap_or_default(),
            },
        },
        "persistence": {
            "size": spec.persistence.size,
            "storageClassName": spec.persistence.storage_class_name.clone().unwrap_or_default(),
        },
        "config": spec.config,
        "labels": spec.labels,
        "apiKeyEnabled": spec.api_key.enabled,
    });

    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    to_hex(&Sha256::digest(&bytes))
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
