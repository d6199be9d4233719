//! Exporter configuration

use anyhow::{bail, Context, Result};
use exporter_lib::catalog::{
    DEFAULT_LATEST_WINDOW_SECONDS, DEFAULT_RECOMMENDATION_WINDOW_SECONDS,
    MIN_SNAPSHOT_WINDOW_SECONDS,
};
use exporter_lib::materializer::MaterializeMode;
use exporter_lib::models::{PointSelection, TablePath};
use exporter_lib::query::DEFAULT_MONITORING_ENDPOINT;
use exporter_lib::warehouse::{DEFAULT_BIGQUERY_ENDPOINT, DEFAULT_STORAGE_WRITE_ENDPOINT};
use exporter_lib::writer::DEFAULT_MAX_ROWS_PER_APPEND;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exporter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Project that owns the cluster metrics and the warehouse tables
    pub project_id: String,

    #[serde(default = "default_dataset")]
    pub bigquery_dataset: String,

    /// Staging table
    #[serde(default = "default_metric_table")]
    pub bigquery_table: String,

    #[serde(default = "default_recommendation_table")]
    pub recommendation_table: String,

    #[serde(default = "default_recommendation_window", alias = "rec_window")]
    pub recommendation_window_seconds: i64,

    #[serde(default = "default_latest_window", alias = "metric_window")]
    pub latest_window_seconds: i64,

    #[serde(default)]
    pub point_selection: PointSelection,

    #[serde(default)]
    pub materialize_mode: MaterializeMode,

    #[serde(default)]
    pub purge_after_run: bool,

    #[serde(default = "default_max_rows_per_append")]
    pub max_rows_per_append: usize,

    /// Replaces the embedded recommendation load statement
    #[serde(default)]
    pub recommendation_sql_path: Option<PathBuf>,

    #[serde(default = "default_monitoring_endpoint")]
    pub monitoring_endpoint: String,

    #[serde(default = "default_bigquery_endpoint")]
    pub bigquery_endpoint: String,

    #[serde(default = "default_storage_write_endpoint")]
    pub storage_write_endpoint: String,

    /// Static bearer token; the metadata server is used when unset
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_dataset() -> String {
    "metric_export".to_string()
}

fn default_metric_table() -> String {
    "mql_metrics".to_string()
}

fn default_recommendation_table() -> String {
    "vpa_container_recommendations".to_string()
}

fn default_recommendation_window() -> i64 {
    DEFAULT_RECOMMENDATION_WINDOW_SECONDS
}

fn default_latest_window() -> i64 {
    DEFAULT_LATEST_WINDOW_SECONDS
}

fn default_max_rows_per_append() -> usize {
    DEFAULT_MAX_ROWS_PER_APPEND
}

fn default_monitoring_endpoint() -> String {
    DEFAULT_MONITORING_ENDPOINT.to_string()
}

fn default_bigquery_endpoint() -> String {
    DEFAULT_BIGQUERY_ENDPOINT.to_string()
}

fn default_storage_write_endpoint() -> String {
    DEFAULT_STORAGE_WRITE_ENDPOINT.to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl ExporterConfig {
    /// Load configuration from an optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .context("failed to read configuration")?;
        Self::from_config(config)
    }

    pub fn from_config(config: config::Config) -> Result<Self> {
        let parsed: Self = config
            .try_deserialize()
            .context("invalid configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            bail!("project_id must not be empty");
        }
        if self.latest_window_seconds < MIN_SNAPSHOT_WINDOW_SECONDS {
            bail!(
                "latest_window_seconds must be at least {}, got {}",
                MIN_SNAPSHOT_WINDOW_SECONDS,
                self.latest_window_seconds
            );
        }
        if self.recommendation_window_seconds <= 0 {
            bail!("recommendation_window_seconds must be positive");
        }
        if self.max_rows_per_append == 0 {
            bail!("max_rows_per_append must be positive");
        }
        Ok(())
    }

    pub fn staging_table(&self) -> TablePath {
        TablePath::new(&self.project_id, &self.bigquery_dataset, &self.bigquery_table)
    }

    pub fn recommendation_table_path(&self) -> TablePath {
        TablePath::new(
            &self.project_id,
            &self.bigquery_dataset,
            &self.recommendation_table,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn from_toml(text: &str) -> Result<ExporterConfig> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?;
        ExporterConfig::from_config(config)
    }

    #[test]
    fn test_defaults() {
        let config = from_toml(r#"project_id = "proj""#).unwrap();

        assert_eq!(config.recommendation_window_seconds, 2_592_000);
        assert_eq!(config.latest_window_seconds, 300);
        assert_eq!(config.point_selection, PointSelection::First);
        assert_eq!(config.materialize_mode, MaterializeMode::Transactional);
        assert!(!config.purge_after_run);
        assert_eq!(config.max_rows_per_append, 500);
        assert_eq!(config.staging_table().to_string(), "proj.metric_export.mql_metrics");
        assert_eq!(
            config.recommendation_table_path().to_string(),
            "proj.metric_export.vpa_container_recommendations"
        );
    }

    #[test]
    fn test_window_aliases() {
        let config = from_toml(
            r#"
            project_id = "proj"
            rec_window = 86400
            metric_window = 600
            materialize_mode = "two-step"
            point_selection = "latest"
            "#,
        )
        .unwrap();

        assert_eq!(config.recommendation_window_seconds, 86_400);
        assert_eq!(config.latest_window_seconds, 600);
        assert_eq!(config.materialize_mode, MaterializeMode::TwoStep);
        assert_eq!(config.point_selection, PointSelection::Latest);
    }

    #[test]
    fn test_short_latest_window_rejected() {
        let err = from_toml(
            r#"
            project_id = "proj"
            latest_window_seconds = 60
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least 300"));
    }

    #[test]
    fn test_project_required() {
        assert!(from_toml(r#"bigquery_dataset = "d""#).is_err());
        assert!(from_toml(r#"project_id = " ""#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.toml");
        std::fs::write(&path, "project_id = \"from-file\"\npurge_after_run = true\n").unwrap();

        let config = Config::builder()
            .add_source(File::from(path.as_path()))
            .build()
            .unwrap();
        let config = ExporterConfig::from_config(config).unwrap();

        assert_eq!(config.project_id, "from-file");
        assert!(config.purge_after_run);
    }
}
