//! Warehouse seams
//!
//! This module provides:
//! - [`StreamingWriter`], the pending-stream write interface, implemented over
//!   the BigQuery Storage Write gRPC API by [`StorageWriteClient`]
//! - [`SqlExecutor`], the SQL interface, implemented over the BigQuery
//!   `jobs.query` REST API by [`BigQueryJobsClient`]

mod jobs;
pub mod proto;
mod storage_write;

pub use jobs::{BigQueryJobsClient, JobsConfig, DEFAULT_BIGQUERY_ENDPOINT};
pub use storage_write::{StorageWriteClient, StorageWriteConfig, DEFAULT_STORAGE_WRITE_ENDPOINT};

use crate::error::ExporterResult;
use crate::models::TablePath;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prost_types::DescriptorProto;

/// Handle of an open write stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStreamHandle {
    pub name: String,
}

/// Serialized rows sent in one append request
#[derive(Debug, Clone, PartialEq)]
pub struct RowChunk {
    /// Offset of the first row within the stream
    pub offset: i64,
    pub rows: Vec<Vec<u8>>,
}

/// Pending-stream write interface. Rows appended to a pending stream stay
/// invisible until the stream is finalized and committed.
#[async_trait]
pub trait StreamingWriter: Send + Sync {
    async fn create_pending_stream(&self, table: &TablePath) -> ExporterResult<WriteStreamHandle>;

    /// Send every chunk over one append channel, close it and wait until all
    /// chunks are acknowledged. Returns the number of rows acknowledged.
    async fn append(
        &self,
        stream: &WriteStreamHandle,
        schema: &DescriptorProto,
        chunks: Vec<RowChunk>,
    ) -> ExporterResult<i64>;

    /// Mark the stream complete; returns the row count the server holds
    async fn finalize(&self, stream: &WriteStreamHandle) -> ExporterResult<i64>;

    /// Atomically make the finalized streams visible in the table
    async fn commit(
        &self,
        table: &TablePath,
        streams: &[WriteStreamHandle],
    ) -> ExporterResult<DateTime<Utc>>;
}

/// Result of a SQL statement or script
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub job_id: Option<String>,
    /// Rows touched by DML, when the statement was DML
    pub affected_rows: Option<i64>,
    /// Result rows in the warehouse's `f`/`v` row encoding
    pub rows: Vec<serde_json::Value>,
}

/// SQL interface of the warehouse
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> ExporterResult<QueryOutcome>;
}
