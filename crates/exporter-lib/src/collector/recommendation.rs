//! Recommendation collector for VPA-style autoscaler metrics
//!
//! Memory recommendations are the window maximum. Cpu recommendations get
//! the window maximum plus a 95th percentile stream for burstable sizing.

use super::{query_or_empty, select_point, workload_record, MetricCollector};
use crate::error::ExporterResult;
use crate::models::{
    AggregationSpec, Aligner, Batch, FlatMetricRecord, MetricDefinition, PointSelection, Reducer,
    RunContext, TimeInterval, CPU_P95_RECOMMENDATION_METRIC,
};
use crate::query::{group_by, TimeSeries, TimeSeriesQuery, TimeSeriesSource, RECOMMENDATION_GROUP_BY};
use crate::units;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Aggregation for recommendation queries over the whole window
pub fn recommendation_aggregation(
    window_seconds: i64,
    aligner: Aligner,
    reducer: Reducer,
) -> AggregationSpec {
    AggregationSpec {
        alignment_period_seconds: window_seconds,
        per_series_aligner: aligner,
        cross_series_reducer: reducer,
        group_by_fields: group_by(RECOMMENDATION_GROUP_BY),
    }
}

/// Collects peak and percentile recommendations per workload
pub struct RecommendationCollector {
    source: Arc<dyn TimeSeriesSource>,
    point_selection: PointSelection,
}

impl RecommendationCollector {
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

    fn record(&self, metric_name: &str, series: &TimeSeries, points: i64, ctx: &RunContext) -> FlatMetricRecord {
        workload_record(
            metric_name,
            series,
            series.resource_label("controller_name"),
            series.resource_label("controller_kind"),
            points,
            ctx,
        )
    }

    async fn collect_max(
        &self,
        definition: &MetricDefinition,
        interval: TimeInterval,
        ctx: &RunContext,
    ) -> ExporterResult<Vec<FlatMetricRecord>> {
        let query = TimeSeriesQuery::new(
            definition.source_metric_type.clone(),
            interval,
            recommendation_aggregation(definition.window_seconds, Aligner::Max, Reducer::Max),
        );
        let series = query_or_empty(self.source.as_ref(), &query).await?;

        Ok(series
            .iter()
            .map(|s| {
                let value = select_point(&s.points, self.point_selection);
                let points = units::normalize_recommendation(&definition.key, &value);
                self.record(&definition.key, s, points, ctx)
            })
            .collect())
    }

    async fn collect_percentile(
        &self,
        definition: &MetricDefinition,
        interval: TimeInterval,
        ctx: &RunContext,
    ) -> ExporterResult<Vec<FlatMetricRecord>> {
        let query = TimeSeriesQuery::new(
            definition.source_metric_type.clone(),
            interval,
            recommendation_aggregation(
                definition.window_seconds,
                Aligner::Mean,
                Reducer::Percentile95,
            ),
        );
        let series = query_or_empty(self.source.as_ref(), &query).await?;

        Ok(series
            .iter()
            .map(|s| {
                let value = match self.point_selection {
                    // the percentile stream keeps the final point returned
                    PointSelection::First => s.points.last().map(|p| p.value).unwrap_or_default(),
                    policy => select_point(&s.points, policy),
                };
                let points = units::percentile_with_int_fallback(&value);
                self.record(CPU_P95_RECOMMENDATION_METRIC, s, points, ctx)
            })
            .collect())
    }
}

#[async_trait]
impl MetricCollector for RecommendationCollector {
    async fn collect(&self, definition: &MetricDefinition, ctx: &RunContext) -> ExporterResult<Batch> {
        let interval = TimeInterval::ending_at(ctx.run_timestamp, definition.window_seconds);

        let mut batch = Batch::new(definition.key.clone());
        batch.records = self.collect_max(definition, interval, ctx).await?;
        let max_records = batch.len();

        if definition.is_cpu() {
            let percentile = self.collect_percentile(definition, interval, ctx).await?;
            batch.records.extend(percentile);
        }

        debug!(
            metric = %definition.key,
            max_records = max_records,
            percentile_records = batch.len() - max_records,
            "Built recommendation records"
        );
        Ok(batch)
    }
}
