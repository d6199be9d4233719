//! Error types for the metrics exporter

use std::fmt;
use thiserror::Error;

/// Result type alias for exporter operations.
pub type ExporterResult<T> = Result<T, ExporterError>;

/// Stage of the pending-stream write protocol that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Create,
    Append,
    Finalize,
    Commit,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Create => "create",
            WriteStage::Append => "append",
            WriteStage::Finalize => "finalize",
            WriteStage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while exporting metrics.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid metric catalog: {0}")]
    Catalog(String),

    #[error("failed to obtain access token: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The query service does not know the metric type at all.
    #[error("metric type not found: {0}")]
    MetricNotFound(String),

    #[error("time series query failed (status {status}): {message}")]
    Query { status: u16, message: String },

    #[error("write stream {stage} failed: {message}")]
    Write { stage: WriteStage, message: String },

    #[error("warehouse query failed: {0}")]
    Sql(String),

    #[error("recommendation materialization failed: {0}")]
    Materialization(String),
}

impl ExporterError {
    pub fn write(stage: WriteStage, message: impl Into<String>) -> Self {
        ExporterError::Write {
            stage,
            message: message.into(),
        }
    }

    /// Whether this error stands for a valid "no data" answer.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, ExporterError::MetricNotFound(_))
    }
}

impl From<reqwest::Error> for ExporterError {
    fn from(err: reqwest::Error) -> Self {
        ExporterError::Transport(err.to_string())
    }
}

impl From<tonic::transport::Error> for ExporterError {
    fn from(err: tonic::transport::Error) -> Self {
        ExporterError::Transport(err.to_string())
    }
}
