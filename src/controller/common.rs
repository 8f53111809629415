//! Shared controller types.
//!
//! Resource identity, the closed set of reconciled kinds, and the readiness
//! summary of a cluster's StatefulSet.

use std::fmt;

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::{Resource, ResourceExt};

/// The kinds of custom resource the operator reconciles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Cluster,
    Collection,
    Restore,
}

impl ResourceKind {
    /// All kinds, in sweep order.
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::Cluster,
        ResourceKind::Collection,
        ResourceKind::Restore,
    ];

    /// Lowercase label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cluster => "cluster",
            ResourceKind::Collection => "collection",
            ResourceKind::Restore => "restore",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a reconciled resource: the sole dedup and locking unit.
///
/// Keys are scoped per kind, so a cluster and a collection with the same
/// namespace/name never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build a key from a namespaced object.
    pub fn from_object<K: Resource>(kind: ResourceKind, obj: &K) -> Self {
        Self::new(
            kind,
            obj.namespace().unwrap_or_else(|| "default".to_string()),
            obj.name_any(),
        )
    }

    /// Key of a sibling resource of another kind in the same namespace.
    pub fn sibling(&self, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::new(kind, self.namespace.clone(), name)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Replica counters of a StatefulSet against the desired peer count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkloadReadiness {
    pub desired: i32,
    pub ready: i32,
    pub available: i32,
    pub updated: i32,
    /// The controller has seen the latest template, so the counters
    /// describe the current revision rather than the previous one.
    pub rolled_out: bool,
}

impl WorkloadReadiness {
    pub fn of(workload: &StatefulSet, desired: i32) -> Self {
        let status = workload.status.as_ref();
        // No generation means nothing to compare against
        let rolled_out = match workload.metadata.generation {
            Some(generation) => status
                .and_then(|s| s.observed_generation)
                .is_some_and(|observed| observed >= generation),
            None => true,
        };
        Self {
            desired,
            ready: status.and_then(|s| s.ready_replicas).unwrap_or(0),
            available: status.and_then(|s| s.available_replicas).unwrap_or(0),
            updated: status.and_then(|s| s.updated_replicas).unwrap_or(0),
            rolled_out,
        }
    }

    /// All desired replicas of the current revision are available and ready.
    pub fn is_ready(&self) -> bool {
        self.rolled_out
            && self.desired > 0
            && self.ready == self.desired
            && self.available == self.desired
            && self.updated == self.desired
    }
}

impl fmt::Display for WorkloadReadiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} replicas ready", self.ready, self.desired)?;
        if !self.rolled_out {
            f.write_str(", rollout pending")?;
        }
        Ok(())
    }
}
