//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when ready to serve traffic)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

use crate::controller::common::ResourceKind;

/// Labels for per-kind metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

/// Labels for error metrics (kind + error type)
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub kind: String,
    pub error_type: String,
}

/// Labels for queue depth metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueueLabels {
    pub queue: String,
}

/// Queue label for debounce timers in the scheduler
pub const QUEUE_SCHEDULER: &str = "scheduler";
/// Queue label for armed retry timers
pub const QUEUE_RETRY: &str = "retry";

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<KindLabels, Counter>,
    /// Failed reconciliations counter
    pub reconciliation_errors_total: Family<ErrorLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<KindLabels, Histogram>,
    /// Spec hash mismatches that triggered a workload re-apply
    pub drift_detected_total: Family<KindLabels, Counter>,
    /// Specs rejected by validation
    pub validation_errors_total: Family<KindLabels, Counter>,
    /// Restores that ended in an unexpected failure
    pub restore_errors_total: Counter,
    /// Retries dropped after exhausting the attempt budget
    pub retries_exhausted_total: Family<KindLabels, Counter>,
    /// Pending timers per queue
    pub queue_depth: Family<QueueLabels, Gauge>,
    /// Reconciles currently executing
    pub active_reconciles: Gauge,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "qdrantoperator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "qdrantoperator_reconciliation_errors",
            "Total number of reconciliation errors by type",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<KindLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "qdrantoperator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let drift_detected_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "qdrantoperator_drift_detected",
            "Total number of spec hash mismatches",
            drift_detected_total.clone(),
        );

        let validation_errors_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "qdrantoperator_validation_errors",
            "Total number of rejected specs",
            validation_errors_total.clone(),
        );

        let restore_errors_total = Counter::default();
        registry.register(
            "qdrantoperator_restore_errors",
            "Total number of restores that failed unexpectedly",
            restore_errors_total.clone(),
        );

        let retries_exhausted_total = Family::<KindLabels, Counter>::default();
        registry.register(
            "qdrantoperator_retries_exhausted",
            "Total number of resources abandoned after the retry cap",
            retries_exhausted_total.clone(),
        );

        let queue_depth = Family::<QueueLabels, Gauge>::default();
        registry.register(
            "qdrantoperator_queue_depth",
            "Number of pending timers per queue",
            queue_depth.clone(),
        );

        let active_reconciles = Gauge::default();
        registry.register(
            "qdrantoperator_active_reconciles",
            "Number of reconciles currently executing",
            active_reconciles.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            drift_detected_total,
            validation_errors_total,
            restore_errors_total,
            retries_exhausted_total,
            queue_depth,
            active_reconciles,
            registry,
        }
    }

    fn kind_labels(kind: ResourceKind) -> KindLabels {
        KindLabels {
            kind: kind.as_str().to_string(),
        }
    }

    /// Record a finished reconciliation
    pub fn record_reconcile(&self, kind: ResourceKind, duration_secs: f64) {
        let labels = Self::kind_labels(kind);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, kind: ResourceKind, error_type: &str) {
        let labels = ErrorLabels {
            kind: kind.as_str().to_string(),
            error_type: error_type.to_string(),
        };
        self.reconciliation_errors_total
            .get_or_create(&labels)
            .inc();
    }

    /// Record a detected spec drift
    pub fn record_drift(&self, kind: ResourceKind) {
        self.drift_detected_total
            .get_or_create(&Self::kind_labels(kind))
            .inc();
    }

    /// Record a rejected spec
    pub fn record_validation_error(&self, kind: ResourceKind) {
        self.validation_errors_total
            .get_or_create(&Self::kind_labels(kind))
            .inc();
    }

    /// Record a restore that failed unexpectedly
    pub fn record_restore_error(&self) {
        self.restore_errors_total.inc();
    }

    /// Record a resource abandoned after the retry cap
    pub fn record_retries_exhausted(&self, kind: ResourceKind) {
        self.retries_exhausted_total
            .get_or_create(&Self::kind_labels(kind))
            .inc();
    }

    /// Update the depth gauge of a queue
    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        let labels = QueueLabels {
            queue: queue.to_string(),
        };
        self.queue_depth
            .get_or_create(&labels)
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Current drift counter for a kind
    pub fn drift_count(&self, kind: ResourceKind) -> u64 {
        self.drift_detected_total
            .get_or_create(&Self::kind_labels(kind))
            .get()
    }

    /// Current validation error counter for a kind
    pub fn validation_error_count(&self, kind: ResourceKind) -> u64 {
        self.validation_errors_total
            .get_or_create(&Self::kind_labels(kind))
            .get()
    }

    /// Current reconcile counter for a kind
    pub fn reconcile_count(&self, kind: ResourceKind) -> u64 {
        self.reconciliations_total
            .get_or_create(&Self::kind_labels(kind))
            .get()
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controller)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Arc<Metrics>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the controller has started.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on the given port.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
