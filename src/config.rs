//! Operator configuration.
//!
//! Every option can be set by flag or environment variable so the same
//! binary works from a Deployment manifest and a developer shell.

use std::time::Duration;

use clap::Parser;

use crate::controller::retry_queue::Backoff;

/// Command-line and environment configuration for qdrant-operator.
#[derive(Parser, Clone, Debug)]
#[command(name = "qdrant-operator", version, about)]
pub struct OperatorConfig {
    /// Restrict watches to one namespace (cluster-wide when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Port for /healthz, /readyz and /metrics
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Seconds between periodic sweeps of all known resources
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// Debounce window applied to every scheduled reconcile, in milliseconds
    #[arg(long, env = "DEBOUNCE_MS", default_value_t = 1000)]
    pub debounce_ms: u64,

    /// Base delay for exponential retry backoff, in milliseconds
    #[arg(long, env = "RETRY_BASE_MS", default_value_t = 1000)]
    pub retry_base_ms: u64,

    /// Upper bound for exponential retry backoff, in seconds
    #[arg(long, env = "RETRY_CAP_SECS", default_value_t = 300)]
    pub retry_cap_secs: u64,

    /// Name of the leader election Lease
    #[arg(long, env = "LEASE_NAME", default_value = "qdrant-operator-leader")]
    pub lease_name: String,

    /// Lease time-to-live in seconds
    #[arg(long, env = "LEASE_TTL_SECS", default_value_t = 15)]
    pub lease_ttl_secs: u64,

    /// Seconds between lease renewals
    #[arg(long, env = "LEASE_RENEW_INTERVAL_SECS", default_value_t = 5)]
    pub lease_renew_interval_secs: u64,

    /// Skip leader election (single-replica and local development)
    #[arg(long, env = "DISABLE_LEADER_ELECTION", default_value_t = false)]
    pub disable_leader_election: bool,

    /// Timeout for data-plane HTTP requests, in seconds
    #[arg(long, env = "DATABASE_TIMEOUT_SECS", default_value_t = 30)]
    pub database_timeout_secs: u64,

    /// Image used by snapshot and restore jobs
    #[arg(long, env = "JOB_IMAGE", default_value = "curlimages/curl:8.10.1")]
    pub job_image: String,

    /// Identity of this pod for leader election
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Namespace holding the leader election Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub pod_namespace: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            health_port: 8080,
            sweep_interval_secs: 300,
            debounce_ms: 1000,
            retry_base_ms: 1000,
            retry_cap_secs: 300,
            lease_name: "qdrant-operator-leader".to_string(),
            lease_ttl_secs: 15,
            lease_renew_interval_secs: 5,
            disable_leader_election: false,
            database_timeout_secs: 30,
            job_image: "curlimages/curl:8.10.1".to_string(),
            pod_name: None,
            pod_namespace: "default".to_string(),
        }
    }
}

impl OperatorConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn lease_renew_interval(&self) -> Duration {
        Duration::from_secs(self.lease_renew_interval_secs)
    }

    pub fn database_timeout(&self) -> Duration {
        Duration::from_secs(self.database_timeout_secs)
    }

    /// Backoff applied to unexpected reconcile failures.
    pub fn error_backoff(&self) -> Backoff {
        Backoff::Exponential {
            base: Duration::from_millis(self.retry_base_ms),
            cap: Duration::from_secs(self.retry_cap_secs),
        }
    }
}
