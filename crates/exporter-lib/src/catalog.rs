//! Metric catalog
//!
//! Static registry of the metrics exported on every run. Iteration order is
//! insertion order and only affects processing and log order.

use crate::error::{ExporterError, ExporterResult};
use crate::models::{MetricCategory, MetricDefinition};
use std::collections::HashSet;

/// Smallest window a snapshot metric may use. Shorter windows race the
/// query service's ingestion delay and come back empty.
pub const MIN_SNAPSHOT_WINDOW_SECONDS: i64 = 300;

/// Default window for snapshot metrics (5 minutes)
pub const DEFAULT_LATEST_WINDOW_SECONDS: i64 = 300;

/// Default window for recommendation metrics (30 days)
pub const DEFAULT_RECOMMENDATION_WINDOW_SECONDS: i64 = 2_592_000;

/// Ordered, validated set of metric definitions
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    definitions: Vec<MetricDefinition>,
}

impl MetricCatalog {
    /// Build a catalog, rejecting malformed or duplicate definitions
    pub fn new(definitions: Vec<MetricDefinition>) -> ExporterResult<Self> {
        let mut seen = HashSet::new();
        for def in &definitions {
            validate_definition(def)?;
            if !seen.insert(def.key.as_str()) {
                return Err(ExporterError::Catalog(format!(
                    "duplicate metric key '{}'",
                    def.key
                )));
            }
        }
        Ok(Self { definitions })
    }

    /// The GKE workload catalog with the given windows
    pub fn gke_default(
        latest_window_seconds: i64,
        recommendation_window_seconds: i64,
    ) -> ExporterResult<Self> {
        use MetricCategory::{Recommendation, Snapshot};

        let latest = latest_window_seconds;
        let rec = recommendation_window_seconds;

        Self::new(vec![
            MetricDefinition::new(
                "container_count",
                "kubernetes.io/container/cpu/request_cores",
                latest,
                Snapshot,
            ),
            MetricDefinition::new(
                "cpu_requested_cores",
                "kubernetes.io/container/cpu/request_cores",
                latest,
                Snapshot,
            ),
            MetricDefinition::new(
                "cpu_limit_cores",
                "kubernetes.io/container/cpu/limit_cores",
                latest,
                Snapshot,
            ),
            MetricDefinition::new(
                "memory_requested_bytes",
                "kubernetes.io/container/memory/request_bytes",
                latest,
                Snapshot,
            ),
            MetricDefinition::new(
                "memory_limit_bytes",
                "kubernetes.io/container/memory/limit_bytes",
                latest,
                Snapshot,
            ),
            MetricDefinition::new(
                "memory_request_recommendations",
                "kubernetes.io/autoscaler/container/memory/per_replica_recommended_request_bytes",
                rec,
                Recommendation,
            ),
            MetricDefinition::new(
                "cpu_request_recommendations",
                "kubernetes.io/autoscaler/container/cpu/per_replica_recommended_request_cores",
                rec,
                Recommendation,
            ),
            MetricDefinition::new(
                "hpa_cpu",
                "custom.googleapis.com/podautoscaler/hpa/cpu/target_utilization",
                latest,
                Snapshot,
            ),
            MetricDefinition::new(
                "hpa_memory",
                "custom.googleapis.com/podautoscaler/hpa/memory/target_utilization",
                latest,
                Snapshot,
            ),
        ])
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.iter()
    }

    pub fn get(&self, key: &str) -> Option<&MetricDefinition> {
        self.definitions.iter().find(|d| d.key == key)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Keep only the given keys, preserving catalog order
    pub fn retain_keys(&self, keys: &[String]) -> ExporterResult<Self> {
        if let Some(unknown) = keys.iter().find(|k| self.get(k).is_none()) {
            return Err(ExporterError::Catalog(format!(
                "unknown metric key '{}'",
                unknown
            )));
        }
        Ok(Self {
            definitions: self
                .definitions
                .iter()
                .filter(|d| keys.contains(&d.key))
                .cloned()
                .collect(),
        })
    }
}

impl<'a> IntoIterator for &'a MetricCatalog {
    type Item = &'a MetricDefinition;
    type IntoIter = std::slice::Iter<'a, MetricDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.definitions.iter()
    }
}

fn validate_definition(def: &MetricDefinition) -> ExporterResult<()> {
    if def.key.trim().is_empty() {
        return Err(ExporterError::Catalog("metric key must not be empty".into()));
    }
    if def.source_metric_type.trim().is_empty() {
        return Err(ExporterError::Catalog(format!(
            "metric '{}' has no source metric type",
            def.key
        )));
    }
    if def.window_seconds <= 0 {
        return Err(ExporterError::Catalog(format!(
            "metric '{}' has non-positive window {}s",
            def.key, def.window_seconds
        )));
    }
    if def.category == MetricCategory::Snapshot && def.window_seconds < MIN_SNAPSHOT_WINDOW_SECONDS
    {
        return Err(ExporterError::Catalog(format!(
            "snapshot metric '{}' window {}s is below the {}s minimum",
            def.key, def.window_seconds, MIN_SNAPSHOT_WINDOW_SECONDS
        )));
    }
    Ok(())
}
