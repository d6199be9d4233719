//! Export run orchestration
//!
//! Walks the catalog in order, collects each metric with the collector for
//! its category and commits the batch before moving on. Materialization
//! runs once every batch is committed, and only when the run committed at
//! least one row. Any error aborts the run.

use crate::catalog::MetricCatalog;
use crate::collector::MetricCollector;
use crate::error::{ExporterError, ExporterResult};
use crate::materializer::RecommendationMaterializer;
use crate::models::{MetricCategory, RunContext};
use crate::observability::{ExporterMetrics, StructuredLogger};
use crate::purge::StagingPurge;
use crate::writer::BatchWriter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Per-metric result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricOutcome {
    pub metric_key: String,
    pub category: MetricCategory,
    pub records: usize,
    pub committed_rows: i64,
}

/// Result of a complete run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_timestamp: DateTime<Utc>,
    pub metrics: Vec<MetricOutcome>,
    pub committed_rows: i64,
    pub materialization_mode: Option<String>,
    pub purged_rows: Option<i64>,
}

impl RunSummary {
    fn new(ctx: &RunContext) -> Self {
        Self {
            run_timestamp: ctx.run_timestamp,
            metrics: Vec::new(),
            committed_rows: 0,
            materialization_mode: None,
            purged_rows: None,
        }
    }
}

fn category_label(category: MetricCategory) -> &'static str {
    match category {
        MetricCategory::Snapshot => "snapshot",
        MetricCategory::Recommendation => "recommendation",
    }
}

/// Sequential export pipeline
pub struct Pipeline {
    catalog: MetricCatalog,
    snapshot: Arc<dyn MetricCollector>,
    recommendation: Arc<dyn MetricCollector>,
    writer: BatchWriter,
    materializer: RecommendationMaterializer,
    purge: Option<StagingPurge>,
    metrics: ExporterMetrics,
    logger: StructuredLogger,
}

impl Pipeline {
    pub fn new(
        catalog: MetricCatalog,
        snapshot: Arc<dyn MetricCollector>,
        recommendation: Arc<dyn MetricCollector>,
        writer: BatchWriter,
        materializer: RecommendationMaterializer,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            catalog,
            snapshot,
            recommendation,
            writer,
            materializer,
            purge: None,
            metrics: ExporterMetrics::new(),
            logger,
        }
    }

    /// Purge the staging table after a successful materialization
    pub fn with_purge(mut self, purge: StagingPurge) -> Self {
        self.purge = Some(purge);
        self
    }

    fn collector_for(&self, category: MetricCategory) -> &dyn MetricCollector {
        match category {
            MetricCategory::Snapshot => self.snapshot.as_ref(),
            MetricCategory::Recommendation => self.recommendation.as_ref(),
        }
    }

    pub async fn run(&self, ctx: &RunContext) -> ExporterResult<RunSummary> {
        let started = Instant::now();
        self.logger
            .log_run_started(ctx.timestamp_seconds(), self.catalog.len());

        let result = self.run_inner(ctx).await;

        let elapsed = started.elapsed();
        self.metrics.observe_run_duration(elapsed);
        match &result {
            Ok(summary) => self
                .logger
                .log_run_finished(summary.committed_rows, elapsed, true),
            Err(_) => self.logger.log_run_finished(0, elapsed, false),
        }
        result
    }

    async fn run_inner(&self, ctx: &RunContext) -> ExporterResult<RunSummary> {
        let mut summary = RunSummary::new(ctx);

        for definition in &self.catalog {
            let category = category_label(definition.category);

            let batch = match self
                .collector_for(definition.category)
                .collect(definition, ctx)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    if matches!(e, ExporterError::Query { .. }) {
                        self.metrics.inc_query_failures();
                    }
                    return Err(e);
                }
            };
            self.metrics.add_records_collected(category, batch.len());
            self.logger
                .log_metric_collected(&definition.key, category, batch.len());

            let write_started = Instant::now();
            let committed_rows = match self.writer.write_batch(&batch).await? {
                Some(write) => {
                    let latency = write_started.elapsed();
                    self.metrics.record_commit(write.rows, latency);
                    self.logger
                        .log_batch_committed(&definition.key, write.rows, &write.stream.name, latency);
                    write.rows
                }
                None => 0,
            };

            summary.committed_rows += committed_rows;
            summary.metrics.push(MetricOutcome {
                metric_key: definition.key.clone(),
                category: definition.category,
                records: batch.len(),
                committed_rows,
            });
        }

        // the load reads the newest staging snapshot, which is a previous
        // run's when nothing was committed now
        if summary.committed_rows > 0 {
            let materialized = self.materializer.materialize().await?;
            self.logger
                .log_materialization(&materialized.mode.to_string(), materialized.inserted_rows);
            summary.materialization_mode = Some(materialized.mode.to_string());
        } else {
            info!("No rows committed, keeping the current recommendation snapshot");
        }

        if let Some(purge) = &self.purge {
            let deleted = purge.purge(ctx).await?;
            self.logger
                .log_purge(&self.writer.table().to_string(), deleted);
            summary.purged_rows = Some(deleted);
        }

        debug!(
            metrics = summary.metrics.len(),
            committed_rows = summary.committed_rows,
            "Run complete"
        );
        Ok(summary)
    }
}
