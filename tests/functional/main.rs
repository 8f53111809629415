// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the reconcilers and the scheduler.
//!
//! These tests drive the real state machines against in-memory fakes of the
//! platform and database collaborators, WITHOUT requiring a live Kubernetes
//! cluster or a running Qdrant.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_cluster_create_then_healthy
//!
//! # Run with verbose output
//! cargo test --test functional -- --nocapture
//! ```
//!
//! ## Test Categories
//!
//! - **Cluster tests**: create, drift, readiness, sticky invalid spec
//! - **Collection tests**: gating on the owning cluster and database
//! - **Restore tests**: job polling to a terminal phase (paused clock)
//! - **Scheduler tests**: debounce, dedup, retries, shutdown and sweeps

mod cluster_tests;
mod mock_platform;
mod restore_tests;

// Re-export for use in tests
pub use mock_platform::*;
