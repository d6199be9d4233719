//! Collector tests against a scripted time series source

use super::*;
use crate::error::ExporterError;
use crate::models::{Aligner, MetricCategory, Reducer, CPU_P95_RECOMMENDATION_METRIC};
use crate::query::Point;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Source that replays scripted responses and records every query
#[derive(Default)]
struct ScriptedSource {
    responses: Mutex<VecDeque<ExporterResult<Vec<TimeSeries>>>>,
    queries: Mutex<Vec<TimeSeriesQuery>>,
}

impl ScriptedSource {
    fn new(responses: Vec<ExporterResult<Vec<TimeSeries>>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            queries: Mutex::new(Vec::new()),
        })
    }

    fn queries(&self) -> Vec<TimeSeriesQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimeSeriesSource for ScriptedSource {
    async fn query(&self, query: &TimeSeriesQuery) -> ExporterResult<Vec<TimeSeries>> {
        self.queries.lock().unwrap().push(query.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn workload_series(controller: &str, values: Vec<TypedValue>) -> TimeSeries {
    TimeSeries {
        resource_labels: labels(&[
            ("location", "us-central1"),
            ("project_id", "proj"),
            ("cluster_name", "prod"),
            ("namespace_name", "shop"),
            ("controller_name", controller),
            ("controller_kind", "Deployment"),
        ]),
        system_labels: labels(&[
            ("top_level_controller_name", controller),
            ("top_level_controller_type", "Deployment"),
        ]),
        points: values
            .into_iter()
            .map(|value| Point {
                end_time: None,
                value,
            })
            .collect(),
        ..Default::default()
    }
}

fn ctx() -> RunContext {
    RunContext::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
}

fn snapshot(key: &str) -> MetricDefinition {
    MetricDefinition::new(key, format!("source/{key}"), 300, MetricCategory::Snapshot)
}

fn recommendation(key: &str) -> MetricDefinition {
    MetricDefinition::new(
        key,
        format!("source/{key}"),
        2_592_000,
        MetricCategory::Recommendation,
    )
}

mod snapshot_tests {
    use super::*;

    #[test]
    fn test_count_keys_use_count_reducer() {
        for key in ["container_count", "pod_count"] {
            assert_eq!(
                snapshot_aggregation(&snapshot(key)).cross_series_reducer,
                Reducer::Count
            );
        }
        for key in ["cpu_requested_cores", "memory_limit_bytes", "hpa_cpu"] {
            assert_eq!(
                snapshot_aggregation(&snapshot(key)).cross_series_reducer,
                Reducer::Mean
            );
        }
    }

    #[test]
    fn test_hpa_grouping() {
        let spec = snapshot_aggregation(&snapshot("hpa_memory"));
        assert!(spec
            .group_by_fields
            .contains(&"metric.label.\"targetref_name\"".to_string()));
        assert_eq!(spec.per_series_aligner, Aligner::Mean);
        assert_eq!(spec.alignment_period_seconds, 300);

        let spec = snapshot_aggregation(&snapshot("cpu_limit_cores"));
        assert!(spec
            .group_by_fields
            .contains(&"metadata.system_labels.\"top_level_controller_name\"".to_string()));
    }

    #[tokio::test]
    async fn test_container_count_three_groups() {
        let source = ScriptedSource::new(vec![Ok(vec![
            workload_series("web", vec![TypedValue::int64(3)]),
            workload_series("api", vec![TypedValue::int64(5)]),
            workload_series("worker", vec![TypedValue::int64(1)]),
        ])]);
        let collector = SnapshotCollector::new(source.clone());

        let batch = collector
            .collect(&snapshot("container_count"), &ctx())
            .await
            .unwrap();

        assert_eq!(batch.metric_key, "container_count");
        let points: Vec<i64> = batch.records.iter().map(|r| r.points).collect();
        assert_eq!(points, vec![3, 5, 1]);

        let record = &batch.records[0];
        assert_eq!(record.controller_name, "web");
        assert_eq!(record.controller_type, "Deployment");
        assert_eq!(record.namespace_name, "shop");
        assert_eq!(record.timestamp_seconds, 1_700_000_000);

        let query = &source.queries()[0];
        assert_eq!(query.interval.start_time.timestamp(), 1_699_999_700);
        assert!(query.filter.contains("!= \"kube-system\""));
    }

    #[tokio::test]
    async fn test_first_point_wins_by_default() {
        let source = ScriptedSource::new(vec![Ok(vec![workload_series(
            "web",
            vec![TypedValue::double(0.5), TypedValue::double(0.9)],
        )])]);
        let collector = SnapshotCollector::new(source);

        let batch = collector
            .collect(&snapshot("cpu_requested_cores"), &ctx())
            .await
            .unwrap();
        assert_eq!(batch.records[0].points, 500);
    }

    #[tokio::test]
    async fn test_mean_point_selection() {
        let source = ScriptedSource::new(vec![Ok(vec![workload_series(
            "web",
            vec![TypedValue::double(0.5), TypedValue::double(0.9)],
        )])]);
        let collector = SnapshotCollector::with_point_selection(source, PointSelection::Mean);

        let batch = collector
            .collect(&snapshot("cpu_requested_cores"), &ctx())
            .await
            .unwrap();
        assert_eq!(batch.records[0].points, 700);
    }

    #[tokio::test]
    async fn test_hpa_controller_from_target_ref() {
        let mut series = workload_series("ignored", vec![TypedValue::double(0.75)]);
        series.metric_labels = labels(&[
            ("targetref_name", "frontend"),
            ("targetref_kind", "StatefulSet"),
        ]);
        let source = ScriptedSource::new(vec![Ok(vec![series])]);
        let collector = SnapshotCollector::new(source);

        let batch = collector.collect(&snapshot("hpa_cpu"), &ctx()).await.unwrap();
        let record = &batch.records[0];
        assert_eq!(record.controller_name, "frontend");
        assert_eq!(record.controller_type, "StatefulSet");
        assert_eq!(record.points, 750);
    }

    #[tokio::test]
    async fn test_empty_series_emits_zero() {
        let source = ScriptedSource::new(vec![Ok(vec![workload_series("web", vec![])])]);
        let collector = SnapshotCollector::new(source);

        let batch = collector
            .collect(&snapshot("memory_limit_bytes"), &ctx())
            .await
            .unwrap();
        assert_eq!(batch.records[0].points, 0);
    }

    #[tokio::test]
    async fn test_unknown_metric_is_empty_batch() {
        let source = ScriptedSource::new(vec![Err(ExporterError::MetricNotFound(
            "custom.googleapis.com/podautoscaler/hpa/cpu/target_utilization".into(),
        ))]);
        let collector = SnapshotCollector::new(source);

        let batch = collector.collect(&snapshot("hpa_cpu"), &ctx()).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_service_failure_propagates() {
        let source = ScriptedSource::new(vec![Err(ExporterError::Query {
            status: 500,
            message: "internal".into(),
        })]);
        let collector = SnapshotCollector::new(source);

        let result = collector.collect(&snapshot("hpa_cpu"), &ctx()).await;
        assert!(matches!(result, Err(ExporterError::Query { status: 500, .. })));
    }
}

mod recommendation_tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_max_uses_int_bytes() {
        let source = ScriptedSource::new(vec![Ok(vec![workload_series(
            "web",
            vec![TypedValue::int64(2_097_152)],
        )])]);
        let collector = RecommendationCollector::new(source.clone());

        let batch = collector
            .collect(&recommendation("memory_request_recommendations"), &ctx())
            .await
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].points, 2);
        assert_eq!(batch.records[0].controller_name, "web");
        assert_eq!(batch.records[0].controller_type, "Deployment");

        // memory issues a single max query
        let queries = source.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].aggregation.cross_series_reducer, Reducer::Max);
        assert_eq!(queries[0].aggregation.per_series_aligner, Aligner::Max);
        assert_eq!(queries[0].aggregation.alignment_period_seconds, 2_592_000);
    }

    #[tokio::test]
    async fn test_cpu_adds_percentile_stream_with_fallback() {
        let fallback = TypedValue {
            double_value: Some(0.0),
            int64_value: Some(3_145_728),
        };
        let source = ScriptedSource::new(vec![
            Ok(vec![workload_series("web", vec![TypedValue::double(1.2345)])]),
            Ok(vec![workload_series("web", vec![fallback])]),
        ]);
        let collector = RecommendationCollector::new(source.clone());

        let batch = collector
            .collect(&recommendation("cpu_request_recommendations"), &ctx())
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records[0].metric_name, "cpu_request_recommendations");
        assert_eq!(batch.records[0].points, 1234);
        assert_eq!(batch.records[1].metric_name, CPU_P95_RECOMMENDATION_METRIC);
        assert_eq!(batch.records[1].points, 3);

        let queries = source.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1].aggregation.cross_series_reducer, Reducer::Percentile95);
        assert_eq!(queries[1].aggregation.per_series_aligner, Aligner::Mean);
    }

    #[tokio::test]
    async fn test_percentile_nonzero_double_is_millicores() {
        let source = ScriptedSource::new(vec![
            Ok(vec![]),
            Ok(vec![workload_series("web", vec![TypedValue::double(0.3)])]),
        ]);
        let collector = RecommendationCollector::new(source);

        let batch = collector
            .collect(&recommendation("cpu_request_recommendations"), &ctx())
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].points, 300);
    }

    #[tokio::test]
    async fn test_percentile_keeps_final_point() {
        let source = ScriptedSource::new(vec![
            Ok(vec![workload_series(
                "web",
                vec![TypedValue::double(1.0), TypedValue::double(2.0)],
            )]),
            Ok(vec![workload_series(
                "web",
                vec![TypedValue::double(0.1), TypedValue::double(0.4)],
            )]),
        ]);
        let collector = RecommendationCollector::new(source);

        let batch = collector
            .collect(&recommendation("cpu_request_recommendations"), &ctx())
            .await
            .unwrap();

        assert_eq!(batch.len(), 2);
        // the max stream follows the default first-point policy
        assert_eq!(batch.records[0].points, 1000);
        assert_eq!(batch.records[1].metric_name, CPU_P95_RECOMMENDATION_METRIC);
        assert_eq!(batch.records[1].points, 400);
    }

    #[tokio::test]
    async fn test_percentile_honors_mean_policy() {
        let source = ScriptedSource::new(vec![
            Ok(vec![]),
            Ok(vec![workload_series(
                "web",
                vec![TypedValue::double(0.1), TypedValue::double(0.3)],
            )]),
        ]);
        let collector = RecommendationCollector::with_point_selection(source, PointSelection::Mean);

        let batch = collector
            .collect(&recommendation("cpu_request_recommendations"), &ctx())
            .await
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].points, 200);
    }

    #[tokio::test]
    async fn test_missing_recommendation_metric_is_empty_batch() {
        let source = ScriptedSource::new(vec![Err(ExporterError::MetricNotFound(
            "kubernetes.io/autoscaler/container/memory/per_replica_recommended_request_bytes"
                .into(),
        ))]);
        let collector = RecommendationCollector::new(source.clone());

        let batch = collector
            .collect(&recommendation("memory_request_recommendations"), &ctx())
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert_eq!(source.queries().len(), 1);
    }

    #[tokio::test]
    async fn test_percentile_failure_propagates() {
        let source = ScriptedSource::new(vec![
            Ok(vec![workload_series("web", vec![TypedValue::double(1.0)])]),
            Err(ExporterError::Query {
                status: 429,
                message: "quota".into(),
            }),
        ]);
        let collector = RecommendationCollector::new(source);

        let result = collector
            .collect(&recommendation("cpu_request_recommendations"), &ctx())
            .await;
        assert!(result.is_err());
    }
}

mod point_selection_tests {
    use super::*;

    fn point(secs: i64, value: TypedValue) -> Point {
        Point {
            end_time: Some(Utc.timestamp_opt(secs, 0).unwrap()),
            value,
        }
    }

    #[test]
    fn test_latest_picks_greatest_end_time() {
        let points = vec![
            point(200, TypedValue::int64(2)),
            point(300, TypedValue::int64(3)),
            point(100, TypedValue::int64(1)),
        ];
        assert_eq!(select_point(&points, PointSelection::Latest), TypedValue::int64(3));
        assert_eq!(select_point(&points, PointSelection::First), TypedValue::int64(2));
    }

    #[test]
    fn test_mean_keeps_fields_apart() {
        let points = vec![point(1, TypedValue::int64(3)), point(2, TypedValue::int64(4))];
        let mean = select_point(&points, PointSelection::Mean);
        assert_eq!(mean.int64_value, Some(3));
        assert_eq!(mean.double_value, None);
    }

    #[test]
    fn test_no_points_is_unset() {
        assert!(!select_point(&[], PointSelection::Latest).is_set());
    }
}
