//! Resource generation module.
//!
//! Contains utilities for generating the Kubernetes resources owned by
//! QdrantCluster, QdrantCollection and QdrantRestore.
//!
//! ## Resources Generated
//!
//! | Resource | Owner | Purpose |
//! |----------|-------|---------|
//! | ConfigMap | QdrantCluster | `QDRANT__*` config overrides |
//! | Secret | QdrantCluster | Data-plane API key |
//! | StatefulSet | QdrantCluster | Stable peer identity and storage |
//! | Headless Service | QdrantCluster | Peer discovery (publishNotReadyAddresses) |
//! | Client Service | QdrantCluster | REST and gRPC endpoint |
//! | PodDisruptionBudget | QdrantCluster | Keep a peer majority during drains |
//! | NetworkPolicy | QdrantCluster | Restrict ingress to peers and allowed namespaces |
//! | CronJob | QdrantCollection | Periodic snapshots with retention |
//! | Job | QdrantRestore | One-shot snapshot recovery |

pub mod common;
pub mod jobs;
pub mod network_policy;
pub mod pdb;
pub mod services;
pub mod statefulset;

// Re-export commonly used items from common
pub use common::{owner_reference, standard_labels};
