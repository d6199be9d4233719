//! Snapshot collector for current utilization and HPA target metrics

use super::{query_or_empty, select_point, workload_record, MetricCollector};
use crate::error::ExporterResult;
use crate::models::{
    AggregationSpec, Aligner, Batch, FlatMetricRecord, MetricDefinition, PointSelection, Reducer,
    RunContext, TimeInterval,
};
use crate::query::{group_by, TimeSeries, TimeSeriesQuery, TimeSeriesSource, HPA_GROUP_BY, WORKLOAD_GROUP_BY};
use crate::units;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Aggregation for a snapshot metric: window-mean alignment, counted for
/// count keys and averaged otherwise, grouped by HPA target or workload.
pub fn snapshot_aggregation(definition: &MetricDefinition) -> AggregationSpec {
    let reducer = if definition.is_count() {
        Reducer::Count
    } else {
        Reducer::Mean
    };
    let fields = if definition.is_hpa() {
        HPA_GROUP_BY
    } else {
        WORKLOAD_GROUP_BY
    };

    AggregationSpec {
        alignment_period_seconds: definition.window_seconds,
        per_series_aligner: Aligner::Mean,
        cross_series_reducer: reducer,
        group_by_fields: group_by(fields),
    }
}

/// Collects one record per workload group over the latest window
pub struct SnapshotCollector {
    source: Arc<dyn TimeSeriesSource>,
    point_selection: PointSelection,
}

impl SnapshotCollector {
    pub fn new(source: Arc<dyn TimeSeriesSource>) -> Self {
        Self::with_point_selection(source, PointSelection::default())
    }

    pub fn with_point_selection(
        source: Arc<dyn TimeSeriesSource>,
        point_selection: PointSelection,
    ) -> Self {
        Self {
            source,
            point_selection,
        }
    }

    fn record_for(
        &self,
        definition: &MetricDefinition,
        series: &TimeSeries,
        ctx: &RunContext,
    ) -> FlatMetricRecord {
        let (controller_name, controller_type) = if definition.is_hpa() {
            (
                series.metric_label("targetref_name"),
                series.metric_label("targetref_kind"),
            )
        } else {
            (
                series.system_label("top_level_controller_name"),
                series.system_label("top_level_controller_type"),
            )
        };

        let value = select_point(&series.points, self.point_selection);
        let points = units::normalize_snapshot(&definition.key, &value);

        workload_record(
            &definition.key,
            series,
            controller_name,
            controller_type,
            points,
            ctx,
        )
    }
}

#[async_trait]
impl MetricCollector for SnapshotCollector {
    async fn collect(&self, definition: &MetricDefinition, ctx: &RunContext) -> ExporterResult<Batch> {
        let query = TimeSeriesQuery::new(
            definition.source_metric_type.clone(),
            TimeInterval::ending_at(ctx.run_timestamp, definition.window_seconds),
            snapshot_aggregation(definition),
        );

        let series = query_or_empty(self.source.as_ref(), &query).await?;

        let mut batch = Batch::new(definition.key.clone());
        batch.records = series
            .iter()
            .map(|s| self.record_for(definition, s, ctx))
            .collect();

        debug!(
            metric = %definition.key,
            records = batch.len(),
            "Built snapshot records"
        );
        Ok(batch)
    }
}
