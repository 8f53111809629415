//! Controller module for qdrant-operator.
//!
//! Contains the scheduling pipeline (scheduler, retry queue, sweeper), the
//! three reconcilers, and the shared error, status, cache and validation
//! helpers they use.

// Shared modules
pub mod cache;
pub mod common;
pub mod context;
pub mod error;
pub mod spec_hash;
pub mod status;
pub mod validation;
pub mod wait;

// Scheduling
pub mod reconciler;
pub mod retry_queue;
pub mod scheduler;
pub mod sweeper;

// Reconcilers
pub mod cluster_reconciler;
pub mod collection_reconciler;
pub mod restore_reconciler;
