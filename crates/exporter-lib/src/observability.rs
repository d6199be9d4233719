//! Observability infrastructure for the exporter
//!
//! Provides:
//! - Prometheus metrics (records collected, commits, query failures, write latency)
//! - Structured JSON logging with tracing

use crate::error::{ExporterError, ExporterResult};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for warehouse write latency (in seconds)
const WRITE_LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Histogram buckets for whole-run duration (in seconds)
const RUN_DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ExporterMetricsInner> = OnceLock::new();

struct ExporterMetricsInner {
    records_collected: IntCounterVec,
    batches_committed: IntCounter,
    rows_committed: IntCounter,
    query_failures: IntCounter,
    write_latency_seconds: Histogram,
    run_duration_seconds: Histogram,
}

impl ExporterMetricsInner {
    fn new() -> Self {
        // names are static, registration only fails on a duplicate
        Self {
            records_collected: register_int_counter_vec!(
                "metrics_exporter_records_collected_total",
                "Records built from time series queries",
                &["category"]
            )
            .expect("Failed to register records_collected"),

            batches_committed: register_int_counter!(
                "metrics_exporter_batches_committed_total",
                "Batches committed to the staging table"
            )
            .expect("Failed to register batches_committed"),

            rows_committed: register_int_counter!(
                "metrics_exporter_rows_committed_total",
                "Rows committed to the staging table"
            )
            .expect("Failed to register rows_committed"),

            query_failures: register_int_counter!(
                "metrics_exporter_query_failures_total",
                "Time series queries that failed"
            )
            .expect("Failed to register query_failures"),

            write_latency_seconds: register_histogram!(
                "metrics_exporter_batch_write_seconds",
                "Time spent writing one batch through a pending stream",
                WRITE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register write_latency_seconds"),

            run_duration_seconds: register_histogram!(
                "metrics_exporter_run_duration_seconds",
                "Duration of a full export run",
                RUN_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register run_duration_seconds"),
        }
    }
}

/// Exporter metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    _private: (),
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static ExporterMetricsInner {
        GLOBAL_METRICS.get_or_init(ExporterMetricsInner::new)
    }

    pub fn add_records_collected(&self, category: &str, count: usize) {
        self.inner()
            .records_collected
            .with_label_values(&[category])
            .inc_by(count as u64);
    }

    pub fn records_collected(&self, category: &str) -> u64 {
        self.inner()
            .records_collected
            .with_label_values(&[category])
            .get()
    }

    pub fn record_commit(&self, rows: i64, latency: Duration) {
        let inner = self.inner();
        inner.batches_committed.inc();
        inner.rows_committed.inc_by(rows.max(0) as u64);
        inner.write_latency_seconds.observe(latency.as_secs_f64());
    }

    pub fn rows_committed(&self) -> u64 {
        self.inner().rows_committed.get()
    }

    pub fn inc_query_failures(&self) {
        self.inner().query_failures.inc();
    }

    pub fn observe_run_duration(&self, duration: Duration) {
        self.inner().run_duration_seconds.observe(duration.as_secs_f64());
    }

    /// Text exposition of every metric in the default registry
    pub fn render(&self) -> ExporterResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| ExporterError::Config(format!("failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| ExporterError::Config(format!("metrics are not utf-8: {}", e)))
    }
}

/// Structured logger for exporter events
///
/// Emits consistent named events for the run lifecycle, batches and
/// materialization.
#[derive(Clone)]
pub struct StructuredLogger {
    project_id: String,
}

impl StructuredLogger {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
        }
    }

    pub fn log_run_started(&self, run_timestamp: i64, metrics: usize) {
        info!(
            event = "run_started",
            project = %self.project_id,
            run_timestamp = run_timestamp,
            metrics = metrics,
            "Export run started"
        );
    }

    pub fn log_metric_collected(&self, metric: &str, category: &str, records: usize) {
        info!(
            event = "metric_collected",
            project = %self.project_id,
            metric = %metric,
            category = %category,
            records = records,
            "Collected metric"
        );
    }

    pub fn log_batch_committed(&self, metric: &str, rows: i64, stream: &str, latency: Duration) {
        info!(
            event = "batch_committed",
            project = %self.project_id,
            metric = %metric,
            rows = rows,
            stream = %stream,
            latency_ms = latency.as_millis() as u64,
            "Batch committed"
        );
    }

    pub fn log_materialization(&self, mode: &str, inserted_rows: Option<i64>) {
        info!(
            event = "materialization_completed",
            project = %self.project_id,
            mode = %mode,
            inserted_rows = ?inserted_rows,
            "Recommendations materialized"
        );
    }

    pub fn log_purge(&self, table: &str, deleted_rows: i64) {
        info!(
            event = "purge_completed",
            project = %self.project_id,
            table = %table,
            deleted_rows = deleted_rows,
            "Staging table purged"
        );
    }

    pub fn log_run_finished(&self, committed_rows: i64, duration: Duration, success: bool) {
        if success {
            info!(
                event = "run_finished",
                project = %self.project_id,
                committed_rows = committed_rows,
                duration_ms = duration.as_millis() as u64,
                success = true,
                "Export run finished"
            );
        } else {
            // main reports the failure itself as the single error entry
            warn!(
                event = "run_finished",
                project = %self.project_id,
                committed_rows = committed_rows,
                duration_ms = duration.as_millis() as u64,
                success = false,
                "Export run aborted"
            );
        }
    }
}
