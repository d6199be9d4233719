//! Metric collection from the time series service
//!
//! This module turns catalog entries into aggregated queries and flattens the
//! returned series into [`FlatMetricRecord`]s:
//! - [`SnapshotCollector`] for short-window utilization and HPA targets
//! - [`RecommendationCollector`] for long-window autoscaler recommendations

mod recommendation;
mod snapshot;

#[cfg(test)]
mod tests;

pub use recommendation::{recommendation_aggregation, RecommendationCollector};
pub use snapshot::{snapshot_aggregation, SnapshotCollector};

use crate::error::ExporterResult;
use crate::models::{Batch, FlatMetricRecord, MetricDefinition, PointSelection, RunContext, TypedValue};
use crate::query::{Point, TimeSeries, TimeSeriesQuery, TimeSeriesSource};
use tracing::info;

use async_trait::async_trait;

/// Trait for turning one catalog entry into one batch of records
#[async_trait]
pub trait MetricCollector: Send + Sync {
    async fn collect(&self, definition: &MetricDefinition, ctx: &RunContext) -> ExporterResult<Batch>;
}

/// Run a query, treating an unknown metric type as "no matching workloads".
/// Every other failure is returned to the caller.
pub(crate) async fn query_or_empty(
    source: &dyn TimeSeriesSource,
    query: &TimeSeriesQuery,
) -> ExporterResult<Vec<TimeSeries>> {
    match source.query(query).await {
        Ok(series) => Ok(series),
        Err(e) if e.is_empty_result() => {
            info!(
                metric_type = %query.metric_type,
                "No matching workloads for metric"
            );
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Pick the representative value of a series according to the policy.
/// A series without points yields an unset value, which normalizes to 0.
pub fn select_point(points: &[Point], policy: PointSelection) -> TypedValue {
    match policy {
        PointSelection::First => points.first().map(|p| p.value).unwrap_or_default(),
        PointSelection::Latest => points
            .iter()
            .max_by_key(|p| p.end_time)
            .map(|p| p.value)
            .unwrap_or_default(),
        PointSelection::Mean => mean_value(points),
    }
}

fn mean_value(points: &[Point]) -> TypedValue {
    let doubles: Vec<f64> = points.iter().filter_map(|p| p.value.double_value).collect();
    let ints: Vec<i64> = points.iter().filter_map(|p| p.value.int64_value).collect();

    let double_value = if doubles.is_empty() {
        None
    } else {
        Some(doubles.iter().sum::<f64>() / doubles.len() as f64)
    };
    let int64_value = if ints.is_empty() {
        None
    } else {
        let sum: i128 = ints.iter().map(|&v| v as i128).sum();
        Some((sum / ints.len() as i128) as i64)
    };

    TypedValue {
        double_value,
        int64_value,
    }
}

/// Build a record from the resource labels shared by every metric class
pub(crate) fn workload_record(
    metric_name: &str,
    series: &TimeSeries,
    controller_name: String,
    controller_type: String,
    points: i64,
    ctx: &RunContext,
) -> FlatMetricRecord {
    FlatMetricRecord {
        metric_name: metric_name.to_string(),
        location: series.resource_label("location"),
        project_id: series.resource_label("project_id"),
        cluster_name: series.resource_label("cluster_name"),
        controller_name,
        controller_type,
        namespace_name: series.resource_label("namespace_name"),
        points,
        timestamp_seconds: ctx.timestamp_seconds(),
    }
}
