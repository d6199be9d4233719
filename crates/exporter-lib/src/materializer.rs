//! Recommendation materializer
//!
//! Retires the current latest snapshot in the recommendation table and
//! loads a new one from the staging table. By default both statements run
//! as one multi-statement transaction.

use crate::error::{ExporterError, ExporterResult};
use crate::models::TablePath;
use crate::warehouse::SqlExecutor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Load statement shipped with the exporter
pub const EMBEDDED_TEMPLATE: &str = include_str!("../sql/recommendation.sql");

pub const RECOMMENDATION_TABLE_PLACEHOLDER: &str = "[RECOMMENDATION_TABLE]";
pub const METRIC_TABLE_PLACEHOLDER: &str = "[METRIC_TABLE]";

/// How the two materialization statements are submitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaterializeMode {
    /// One `BEGIN TRANSACTION ... COMMIT TRANSACTION` script
    #[default]
    Transactional,
    /// Two independent statements
    TwoStep,
}

impl FromStr for MaterializeMode {
    type Err = ExporterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transactional" => Ok(MaterializeMode::Transactional),
            "two-step" | "two_step" => Ok(MaterializeMode::TwoStep),
            other => Err(ExporterError::Config(format!(
                "unknown materialize mode '{}', expected transactional or two-step",
                other
            ))),
        }
    }
}

impl fmt::Display for MaterializeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterializeMode::Transactional => f.write_str("transactional"),
            MaterializeMode::TwoStep => f.write_str("two-step"),
        }
    }
}

/// Load statement with table placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationTemplate {
    text: String,
}

impl Default for RecommendationTemplate {
    fn default() -> Self {
        Self {
            text: EMBEDDED_TEMPLATE.to_string(),
        }
    }
}

impl RecommendationTemplate {
    pub fn from_text(text: impl Into<String>) -> ExporterResult<Self> {
        let text = text.into();
        if !text.contains(METRIC_TABLE_PLACEHOLDER) {
            return Err(ExporterError::Config(format!(
                "recommendation template has no {} placeholder",
                METRIC_TABLE_PLACEHOLDER
            )));
        }
        Ok(Self { text })
    }

    /// Read a template override. The file is only ever read.
    pub fn from_file(path: &Path) -> ExporterResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExporterError::Config(format!(
                "failed to read recommendation template {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_text(text)
    }

    /// Embedded template, or the file at `path` when given
    pub fn load(path: Option<&Path>) -> ExporterResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn render(&self, recommendation_table: &TablePath, metric_table: &TablePath) -> String {
        self.text
            .replace(RECOMMENDATION_TABLE_PLACEHOLDER, &recommendation_table.to_string())
            .replace(METRIC_TABLE_PLACEHOLDER, &metric_table.to_string())
    }
}

/// Result of a materialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializeOutcome {
    pub mode: MaterializeMode,
    /// Affected row counts, reported by the two-step mode only
    pub retired_rows: Option<i64>,
    pub inserted_rows: Option<i64>,
}

/// Rebuilds the latest recommendation snapshot from the staging table
pub struct RecommendationMaterializer {
    executor: Arc<dyn SqlExecutor>,
    recommendation_table: TablePath,
    metric_table: TablePath,
    template: RecommendationTemplate,
    mode: MaterializeMode,
}

impl RecommendationMaterializer {
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        recommendation_table: TablePath,
        metric_table: TablePath,
    ) -> Self {
        Self {
            executor,
            recommendation_table,
            metric_table,
            template: RecommendationTemplate::default(),
            mode: MaterializeMode::default(),
        }
    }

    pub fn with_template(mut self, template: RecommendationTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_mode(mut self, mode: MaterializeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn retire_statement(&self) -> String {
        format!(
            "UPDATE `{}` SET latest = FALSE WHERE latest = TRUE",
            self.recommendation_table
        )
    }

    pub fn load_statement(&self) -> String {
        self.template
            .render(&self.recommendation_table, &self.metric_table)
    }

    pub fn transaction_script(&self) -> String {
        format!(
            "BEGIN TRANSACTION;\n{};\n{};\nCOMMIT TRANSACTION;",
            self.retire_statement(),
            self.load_statement().trim_end().trim_end_matches(';')
        )
    }

    pub async fn materialize(&self) -> ExporterResult<MaterializeOutcome> {
        let outcome = match self.mode {
            MaterializeMode::Transactional => self.materialize_transactional().await?,
            MaterializeMode::TwoStep => self.materialize_two_step().await?,
        };

        info!(
            table = %self.recommendation_table,
            mode = %outcome.mode,
            retired_rows = ?outcome.retired_rows,
            inserted_rows = ?outcome.inserted_rows,
            "Materialized recommendations"
        );
        Ok(outcome)
    }

    async fn materialize_transactional(&self) -> ExporterResult<MaterializeOutcome> {
        self.executor
            .execute(&self.transaction_script())
            .await
            .map_err(|e| {
                ExporterError::Materialization(format!(
                    "transaction rolled back, previous snapshot kept: {}",
                    e
                ))
            })?;

        Ok(MaterializeOutcome {
            mode: MaterializeMode::Transactional,
            retired_rows: None,
            inserted_rows: None,
        })
    }

    async fn materialize_two_step(&self) -> ExporterResult<MaterializeOutcome> {
        let retired = self
            .executor
            .execute(&self.retire_statement())
            .await
            .map_err(|e| {
                ExporterError::Materialization(format!("retiring previous snapshot failed: {}", e))
            })?;

        let inserted = match self.executor.execute(&self.load_statement()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    table = %self.recommendation_table,
                    "Previous snapshot retired but new snapshot not loaded"
                );
                return Err(ExporterError::Materialization(format!(
                    "loading new snapshot failed after retiring the previous one, no rows are latest: {}",
                    e
                )));
            }
        };

        Ok(MaterializeOutcome {
            mode: MaterializeMode::TwoStep,
            retired_rows: retired.affected_rows,
            inserted_rows: inserted.affected_rows,
        })
    }
}
