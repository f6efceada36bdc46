//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe (is the process alive?)
//! - `/readyz` - Readiness probe (is the process ready to serve?)
//! - `/metrics` - Prometheus metrics

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use kube::ResourceExt;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use crate::crd::PolicyClass;
use crate::resources::common::METRICS_PORT;

/// Labels for reconciliation metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ReconcileLabels {
    pub controller: String,
    pub name: String,
}

impl EncodeLabelSet for ReconcileLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("controller", self.controller.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels describing one PolicyClass
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ClassLabels {
    pub name: String,
    pub cpu: String,
    pub memory: String,
    pub is_default: String,
}

impl EncodeLabelSet for ClassLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("cpu", self.cpu.as_str()).encode(encoder.encode_label())?;
        ("memory", self.memory.as_str()).encode(encoder.encode_label())?;
        ("is_default", self.is_default.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PodClassLabels {
    pub class: String,
}

impl EncodeLabelSet for PodClassLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("class", self.class.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for pods admitted without changes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct NotMutatedLabels {
    pub class: String,
    pub generate_name: String,
    pub namespace: String,
    pub reason: String,
}

impl EncodeLabelSet for NotMutatedLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("class", self.class.as_str()).encode(encoder.encode_label())?;
        ("generate_name", self.generate_name.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("reason", self.reason.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels identifying the workload a mutated pod belongs to
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MutatedLabels {
    pub class: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl EncodeLabelSet for MutatedLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("class", self.class.as_str()).encode(encoder.encode_label())?;
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct VersionLabels {
    pub version: String,
}

impl EncodeLabelSet for VersionLabels {
    fn encode(&self, encoder: &mut LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("version", self.version.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics state
pub struct Metrics {
    pub reconciliations_total: Family<ReconcileLabels, Counter>,
    pub reconciliation_errors_total: Family<ReconcileLabels, Counter>,
    pub reconcile_duration_seconds: Family<ReconcileLabels, Histogram>,

    // Class inventory
    pub total_classes: Gauge,
    pub class: Family<ClassLabels, Gauge>,

    // Admission
    pub pods_requested: Family<PodClassLabels, Counter>,
    pub mutated_pods: Family<PodClassLabels, Counter>,
    pub pods_not_mutated: Family<NotMutatedLabels, Counter>,
    pub pod_mutated: Family<MutatedLabels, Counter>,

    pub version: Family<VersionLabels, Gauge>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("overcommit_operator");

        let reconciliations_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ReconcileLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let total_classes = Gauge::default();
        registry.register(
            "total_classes",
            "Number of PolicyClass objects",
            total_classes.clone(),
        );

        let class = Family::<ClassLabels, Gauge>::default();
        registry.register(
            "class",
            "PolicyClass ratios, one series per class",
            class.clone(),
        );

        let pods_requested = Family::<PodClassLabels, Counter>::default();
        registry.register(
            "pods_requested",
            "Pods received by the mutating webhook",
            pods_requested.clone(),
        );

        let mutated_pods = Family::<PodClassLabels, Counter>::default();
        registry.register(
            "mutated_pods",
            "Pods whose requests were scaled",
            mutated_pods.clone(),
        );

        let pods_not_mutated = Family::<NotMutatedLabels, Counter>::default();
        registry.register(
            "pods_not_mutated",
            "Pods admitted without changes",
            pods_not_mutated.clone(),
        );

        let pod_mutated = Family::<MutatedLabels, Counter>::default();
        registry.register(
            "pod_mutated",
            "Mutated pods by owning workload",
            pod_mutated.clone(),
        );

        let version = Family::<VersionLabels, Gauge>::default();
        registry.register("version", "Running operator version", version.clone());

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            total_classes,
            class,
            pods_requested,
            mutated_pods,
            pods_not_mutated,
            pod_mutated,
            version,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, controller: &str, name: &str, duration_secs: f64) {
        let labels = ReconcileLabels {
            controller: controller.to_string(),
            name: name.to_string(),
        };
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, controller: &str, name: &str) {
        let labels = ReconcileLabels {
            controller: controller.to_string(),
            name: name.to_string(),
        };
        self.reconciliation_errors_total.get_or_create(&labels).inc();
    }

    /// Replace the class inventory gauges with `classes`
    pub fn publish_classes(&self, classes: &[PolicyClass]) {
        self.class.clear();
        self.total_classes.set(classes.len() as i64);
        for class in classes {
            let labels = ClassLabels {
                name: class.name_any(),
                cpu: format!("{}", class.spec.cpu_ratio),
                memory: format!("{}", class.spec.memory_ratio),
                is_default: class.spec.is_default.to_string(),
            };
            self.class.get_or_create(&labels).set(1);
        }
    }

    pub fn record_pod_requested(&self, class: &str) {
        self.pods_requested
            .get_or_create(&PodClassLabels {
                class: class.to_string(),
            })
            .inc();
    }

    pub fn record_pod_mutated(&self, class: &str, kind: &str, name: &str, namespace: &str) {
        self.mutated_pods
            .get_or_create(&PodClassLabels {
                class: class.to_string(),
            })
            .inc();
        self.pod_mutated
            .get_or_create(&MutatedLabels {
                class: class.to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
            .inc();
    }

    pub fn record_pod_not_mutated(
        &self,
        class: &str,
        generate_name: &str,
        namespace: &str,
        reason: &str,
    ) {
        self.pods_not_mutated
            .get_or_create(&NotMutatedLabels {
                class: class.to_string(),
                generate_name: generate_name.to_string(),
                namespace: namespace.to_string(),
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Expose the running version as a constant series
    pub fn set_version(&self, version: &str) {
        self.version
            .get_or_create(&VersionLabels {
                version: version.to_string(),
            })
            .set(1);
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether this process is ready to serve
    pub ready: RwLock<bool>,
    pub metrics: Arc<Metrics>,
    /// Unix time of the last successful reconcile
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(Metrics::new()))
    }

    pub fn with_metrics(metrics: Arc<Metrics>) -> Self {
        Self {
            ready: RwLock::new(false),
            metrics,
            last_reconcile: AtomicU64::new(0),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Remember that a reconciliation just completed
    pub fn touch_reconcile(&self) {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.last_reconcile.store(now, Ordering::Relaxed);
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the process marks itself ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [(
            "content-type",
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Run the health server on the metrics port
pub async fn run_health_server(state: Arc<HealthState>) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{METRICS_PORT}");
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Health server listening on {}", addr);

    axum::serve(listener, app).await
}
