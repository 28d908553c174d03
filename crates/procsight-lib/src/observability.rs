//! Observability infrastructure for the profiling pipeline
//!
//! Provides Prometheus metrics for sample ingestion, alert emission, and
//! deadlock analysis, registered once and shared by every session.

use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};
use std::sync::OnceLock;

use crate::models::AnomalyType;

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct PipelineMetricsInner {
    sessions_active: IntGauge,
    samples_ingested: IntCounter,
    alerts_emitted: IntCounterVec,
    deadlock_analyses: IntCounter,
    cycles_found: IntCounter,
    collection_errors: IntCounter,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            sessions_active: register_int_gauge!(
                "procsight_sessions_active",
                "Number of profiling sessions currently accepting samples"
            )
            .expect("Failed to register sessions_active"),

            samples_ingested: register_int_counter!(
                "procsight_samples_ingested_total",
                "Total resource-usage samples appended to session buffers"
            )
            .expect("Failed to register samples_ingested_total"),

            alerts_emitted: register_int_counter_vec!(
                "procsight_alerts_emitted_total",
                "Total anomaly alerts emitted, by anomaly type",
                &["type"]
            )
            .expect("Failed to register alerts_emitted_total"),

            deadlock_analyses: register_int_counter!(
                "procsight_deadlock_analyses_total",
                "Total deadlock analyses computed"
            )
            .expect("Failed to register deadlock_analyses_total"),

            cycles_found: register_int_counter!(
                "procsight_deadlock_cycles_found_total",
                "Total circular waits found across all analyses"
            )
            .expect("Failed to register deadlock_cycles_found_total"),

            collection_errors: register_int_counter!(
                "procsight_collection_errors_total",
                "Total sample collection failures"
            )
            .expect("Failed to register collection_errors_total"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition.
///
/// This is a lightweight handle to the global metrics instance; clones
/// share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn set_sessions_active(&self, count: i64) {
        self.inner().sessions_active.set(count);
    }

    pub fn inc_samples_ingested(&self) {
        self.inner().samples_ingested.inc();
    }

    pub fn inc_alerts_emitted(&self, anomaly_type: AnomalyType) {
        self.inner()
            .alerts_emitted
            .with_label_values(&[&anomaly_type.to_string()])
            .inc();
    }

    pub fn inc_analyses_run(&self) {
        self.inner().deadlock_analyses.inc();
    }

    pub fn add_cycles_found(&self, count: usize) {
        self.inner().cycles_found.inc_by(count as u64);
    }

    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }
}
