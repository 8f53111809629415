//! Custom Resource Definitions (CRDs) for qdrant-operator.
//!
//! - `QdrantCluster`: Deploy and manage the Qdrant StatefulSet and its collaborators
//! - `QdrantCollection`: Declare a collection inside a cluster
//! - `QdrantRestore`: Recover a collection from a snapshot

mod qdrant_cluster;
mod qdrant_collection;
mod qdrant_restore;

pub use qdrant_cluster::*;
pub use qdrant_collection::*;
pub use qdrant_restore::*;
