//! Core data models for the metrics exporter

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Metric name used for the cpu 95th percentile recommendation stream
pub const CPU_P95_RECOMMENDATION_METRIC: &str = "cpu_request_95th_percentile_recommendations";

/// Namespace excluded from every time series query
pub const EXCLUDED_NAMESPACE: &str = "kube-system";

/// Class of a catalog metric, selects the collector that handles it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricCategory {
    /// Short-window current-state utilization or HPA target
    Snapshot,
    /// Long-window autoscaler recommendation
    Recommendation,
}

/// A single catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub key: String,
    pub source_metric_type: String,
    pub window_seconds: i64,
    pub category: MetricCategory,
}

impl MetricDefinition {
    pub fn new(
        key: impl Into<String>,
        source_metric_type: impl Into<String>,
        window_seconds: i64,
        category: MetricCategory,
    ) -> Self {
        Self {
            key: key.into(),
            source_metric_type: source_metric_type.into(),
            window_seconds,
            category,
        }
    }

    /// HPA target metrics are grouped by their scale target reference
    pub fn is_hpa(&self) -> bool {
        self.key.contains("hpa")
    }

    pub fn is_cpu(&self) -> bool {
        self.key.contains("cpu")
    }

    pub fn is_memory(&self) -> bool {
        self.key.contains("memory")
    }

    pub fn is_count(&self) -> bool {
        self.key.contains("count")
    }
}

/// Per-series alignment function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aligner {
    Mean,
    Max,
}

impl Aligner {
    pub fn as_api_name(&self) -> &'static str {
        match self {
            Aligner::Mean => "ALIGN_MEAN",
            Aligner::Max => "ALIGN_MAX",
        }
    }
}

/// Cross-series reduction function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Count,
    Max,
    Percentile95,
}

impl Reducer {
    pub fn as_api_name(&self) -> &'static str {
        match self {
            Reducer::Mean => "REDUCE_MEAN",
            Reducer::Count => "REDUCE_COUNT",
            Reducer::Max => "REDUCE_MAX",
            Reducer::Percentile95 => "REDUCE_PERCENTILE_95",
        }
    }
}

/// Aggregation applied by the query service to one query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationSpec {
    pub alignment_period_seconds: i64,
    pub per_series_aligner: Aligner,
    pub cross_series_reducer: Reducer,
    pub group_by_fields: Vec<String>,
}

/// Closed time interval of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TimeInterval {
    /// Interval `[end - window, end]`
    pub fn ending_at(end_time: DateTime<Utc>, window_seconds: i64) -> Self {
        Self {
            start_time: end_time - Duration::seconds(window_seconds),
            end_time,
        }
    }
}

/// Aggregated point value with the double and int64 fields kept apart.
///
/// The query service fills exactly one of them depending on the metric
/// value type; readers that ask for the other one get zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TypedValue {
    pub double_value: Option<f64>,
    pub int64_value: Option<i64>,
}

impl TypedValue {
    pub fn double(value: f64) -> Self {
        Self {
            double_value: Some(value),
            int64_value: None,
        }
    }

    pub fn int64(value: i64) -> Self {
        Self {
            double_value: None,
            int64_value: Some(value),
        }
    }

    pub fn double_or_zero(&self) -> f64 {
        self.double_value.unwrap_or(0.0)
    }

    pub fn int64_or_zero(&self) -> i64 {
        self.int64_value.unwrap_or(0)
    }

    pub fn is_set(&self) -> bool {
        self.double_value.is_some() || self.int64_value.is_some()
    }
}

/// How one representative value is picked from the points of a series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSelection {
    /// First point in the order returned by the query service
    #[default]
    First,
    /// Point with the greatest end time
    Latest,
    /// Arithmetic mean over all points
    Mean,
}

impl FromStr for PointSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(PointSelection::First),
            "latest" => Ok(PointSelection::Latest),
            "mean" => Ok(PointSelection::Mean),
            other => Err(format!(
                "unknown point selection '{}', expected first, latest or mean",
                other
            )),
        }
    }
}

/// The unit of transport and storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatMetricRecord {
    pub metric_name: String,
    pub location: String,
    pub project_id: String,
    pub cluster_name: String,
    pub controller_name: String,
    pub controller_type: String,
    pub namespace_name: String,
    pub points: i64,
    pub timestamp_seconds: i64,
}

/// Records collected for one metric key in one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub metric_key: String,
    pub records: Vec<FlatMetricRecord>,
}

impl Batch {
    pub fn new(metric_key: impl Into<String>) -> Self {
        Self {
            metric_key: metric_key.into(),
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Values captured once per invocation and shared by every component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub run_timestamp: DateTime<Utc>,
}

impl RunContext {
    pub fn new(run_timestamp: DateTime<Utc>) -> Self {
        Self { run_timestamp }
    }

    /// Capture the wall clock for a new run
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn timestamp_seconds(&self) -> i64 {
        self.run_timestamp.timestamp()
    }
}

/// Fully qualified BigQuery table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePath {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TablePath {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Resource name used by the Storage Write API
    pub fn storage_path(&self) -> String {
        format!(
            "projects/{}/datasets/{}/tables/{}",
            self.project, self.dataset, self.table
        )
    }
}

/// Renders `project.dataset.table`, the form used inside SQL backticks
impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_interval_ending_at() {
        let end = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let interval = TimeInterval::ending_at(end, 300);
        assert_eq!(interval.start_time.timestamp(), 1_699_999_700);
        assert_eq!(interval.end_time, end);
    }

    #[test]
    fn test_typed_value_defaults_to_zero() {
        let value = TypedValue::int64(42);
        assert_eq!(value.double_or_zero(), 0.0);
        assert_eq!(value.int64_or_zero(), 42);
        assert!(!TypedValue::default().is_set());
    }

    #[test]
    fn test_point_selection_parse() {
        assert_eq!("LATEST".parse::<PointSelection>(), Ok(PointSelection::Latest));
        assert!("median".parse::<PointSelection>().is_err());
    }

    #[test]
    fn test_table_path_forms() {
        let table = TablePath::new("proj", "metric_export", "mql_metrics");
        assert_eq!(
            table.storage_path(),
            "projects/proj/datasets/metric_export/tables/mql_metrics"
        );
        assert_eq!(table.to_string(), "proj.metric_export.mql_metrics");
    }

    #[test]
    fn test_definition_key_classes() {
        let def = MetricDefinition::new("hpa_cpu", "t", 300, MetricCategory::Snapshot);
        assert!(def.is_hpa());
        assert!(def.is_cpu());
        assert!(!def.is_memory());
    }
}
