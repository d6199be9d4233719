//! Time series query seam
//!
//! The collectors only see [`TimeSeriesSource`]; the Cloud Monitoring REST
//! client is one implementation, test fakes are another.

mod monitoring;

pub use monitoring::{MonitoringClient, MonitoringConfig, DEFAULT_MONITORING_ENDPOINT};

use crate::error::ExporterResult;
use crate::models::{AggregationSpec, TimeInterval, TypedValue, EXCLUDED_NAMESPACE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Group-by fields for container workload metrics
pub const WORKLOAD_GROUP_BY: &[&str] = &[
    "resource.label.\"location\"",
    "resource.label.\"project_id\"",
    "resource.label.\"cluster_name\"",
    "resource.label.\"controller_name\"",
    "resource.label.\"namespace_name\"",
    "metadata.system_labels.\"top_level_controller_name\"",
    "metadata.system_labels.\"top_level_controller_type\"",
];

/// Group-by fields for HPA target metrics
pub const HPA_GROUP_BY: &[&str] = &[
    "resource.label.\"location\"",
    "resource.label.\"project_id\"",
    "resource.label.\"cluster_name\"",
    "resource.label.\"namespace_name\"",
    "metric.label.\"targetref_kind\"",
    "metric.label.\"targetref_name\"",
];

/// Group-by fields for autoscaler recommendation metrics
pub const RECOMMENDATION_GROUP_BY: &[&str] = &[
    "resource.label.\"location\"",
    "resource.label.\"project_id\"",
    "resource.label.\"cluster_name\"",
    "resource.label.\"controller_name\"",
    "resource.label.\"namespace_name\"",
    "resource.label.\"controller_kind\"",
];

pub fn group_by(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

/// Filter selecting one metric type outside the system namespace
pub fn metric_filter(metric_type: &str) -> String {
    format!(
        "metric.type = \"{}\" AND resource.label.namespace_name != \"{}\"",
        metric_type, EXCLUDED_NAMESPACE
    )
}

/// One aggregated query against the time series service
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesQuery {
    pub metric_type: String,
    pub filter: String,
    pub interval: TimeInterval,
    pub aggregation: AggregationSpec,
}

impl TimeSeriesQuery {
    pub fn new(
        metric_type: impl Into<String>,
        interval: TimeInterval,
        aggregation: AggregationSpec,
    ) -> Self {
        let metric_type = metric_type.into();
        Self {
            filter: metric_filter(&metric_type),
            metric_type,
            interval,
            aggregation,
        }
    }
}

/// A single aggregated point
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub end_time: Option<DateTime<Utc>>,
    pub value: TypedValue,
}

/// One series of a query response, i.e. one resource group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSeries {
    pub metric_labels: HashMap<String, String>,
    pub resource_labels: HashMap<String, String>,
    pub system_labels: HashMap<String, String>,
    pub points: Vec<Point>,
}

impl TimeSeries {
    pub fn resource_label(&self, name: &str) -> String {
        self.resource_labels.get(name).cloned().unwrap_or_default()
    }

    pub fn metric_label(&self, name: &str) -> String {
        self.metric_labels.get(name).cloned().unwrap_or_default()
    }

    pub fn system_label(&self, name: &str) -> String {
        self.system_labels.get(name).cloned().unwrap_or_default()
    }
}

/// Source of aggregated time series
#[async_trait]
pub trait TimeSeriesSource: Send + Sync {
    /// Run one query and return every series of every page.
    ///
    /// An unknown metric type is reported as
    /// [`ExporterError::MetricNotFound`](crate::error::ExporterError::MetricNotFound).
    async fn query(&self, query: &TimeSeriesQuery) -> ExporterResult<Vec<TimeSeries>>;
}
