// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for qdrant-operator.
//!
//! Uses proptest to generate random inputs and verify invariants of the spec
//! hash, retry backoff and disruption budget.

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;

use qdrant_operator::controller::retry_queue::Backoff;
use qdrant_operator::controller::spec_hash::compute_spec_hash;
use qdrant_operator::crd::QdrantClusterSpec;
use qdrant_operator::resources::pdb::max_unavailable;

/// Strategy for small string maps such as config overrides and labels.
fn string_map() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,8}"), 0..8)
}

/// Render a map as a JSON object with keys in the given order.
fn json_object(entries: &[(String, String)]) -> String {
    let fields: Vec<String> = entries
        .iter()
        .map(|(k, v)| format!("{k:?}:{v:?}"))
        .collect();
    format!("{{{}}}", fields.join(","))
}

fn dedup(entries: Vec<(String, String)>) -> Vec<(String, String)> {
    // Later duplicates would win in a map; keep only the first of each key
    let mut seen = BTreeMap::new();
    for (k, v) in entries {
        seen.entry(k).or_insert(v);
    }
    seen.into_iter().collect()
}

fn spec(replicas: i32, image: &str) -> QdrantClusterSpec {
    QdrantClusterSpec {
        replicas,
        image: image.to_string(),
        ..Default::default()
    }
}

proptest! {
    /// Property: Hashing the same spec twice yields the same digest.
    #[test]
    fn test_hash_deterministic(replicas in 1..=50i32, tag in "[a-z0-9.]{1,10}") {
        let spec = spec(replicas, &format!("qdrant/qdrant:{tag}"));
        prop_assert_eq!(compute_spec_hash(&spec), compute_spec_hash(&spec.clone()));
    }

    /// Property: Map insertion order never changes the digest.
    #[test]
    fn test_hash_independent_of_map_order(
        config in string_map().prop_map(dedup),
        labels in string_map().prop_map(dedup),
    ) {
        let forward = format!(
            r#"{{"replicas":3,"image":"x:1","config":{},"labels":{}}}"#,
            json_object(&config),
            json_object(&labels),
        );
        let mut config_rev = config.clone();
        config_rev.reverse();
        let mut labels_rev = labels.clone();
        labels_rev.reverse();
        let reversed = format!(
            r#"{{"labels":{},"config":{},"image":"x:1","replicas":3}}"#,
            json_object(&labels_rev),
            json_object(&config_rev),
        );

        let a: QdrantClusterSpec = serde_json::from_str(&forward).unwrap();
        let b: QdrantClusterSpec = serde_json::from_str(&reversed).unwrap();
        prop_assert_eq!(compute_spec_hash(&a), compute_spec_hash(&b));
    }

    /// Property: A replica change is always detected as drift.
    #[test]
    fn test_hash_sees_replica_changes(a in 1..=50i32, b in 1..=50i32) {
        prop_assume!(a != b);
        prop_assert_ne!(
            compute_spec_hash(&spec(a, "x:1")),
            compute_spec_hash(&spec(b, "x:1"))
        );
    }

    /// Property: Exponential backoff never decreases and never exceeds the cap.
    #[test]
    fn test_backoff_monotonic_and_capped(
        base_ms in 1..=5_000u64,
        cap_secs in 1..=600u64,
        attempts in 1..=40u32,
    ) {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(base_ms),
            cap: Duration::from_secs(cap_secs),
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..attempts {
            let delay = backoff.delay(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= Duration::from_secs(cap_secs));
            previous = delay;
        }
    }

    /// Property: Fixed backoff ignores the attempt number.
    #[test]
    fn test_fixed_backoff_constant(ms in 1..=60_000u64, attempt in 0..=u32::MAX) {
        let delay = Duration::from_millis(ms);
        prop_assert_eq!(Backoff::Fixed(delay).delay(attempt), delay);
    }

    /// Property: The disruption budget always keeps a majority of peers up
    /// once there is more than one peer.
    #[test]
    fn test_disruption_budget_keeps_majority(replicas in 2..=100i32) {
        let unavailable = max_unavailable(replicas);
        prop_assert!(unavailable >= 0);
        prop_assert!(replicas - unavailable > replicas / 2);
    }
}
