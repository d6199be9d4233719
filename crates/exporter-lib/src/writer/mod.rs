//! Durable batch writer
//!
//! Each batch goes through its own pending stream: create, append in
//! chunks, finalize, then commit. Rows only become visible on commit, so a
//! batch is either fully written or not written at all.

mod schema;

pub use schema::{encode_row, write_schema, FlatMetricRow};

use crate::error::{ExporterError, ExporterResult, WriteStage};
use crate::models::{Batch, TablePath};
use crate::warehouse::{RowChunk, StreamingWriter, WriteStreamHandle};
use chrono::{DateTime, Utc};
use prost_types::DescriptorProto;
use std::sync::Arc;
use tracing::{debug, info};

/// Default number of rows carried by one append request
pub const DEFAULT_MAX_ROWS_PER_APPEND: usize = 500;

/// Outcome of a committed batch
#[derive(Debug, Clone, PartialEq)]
pub struct WriteSummary {
    pub metric_key: String,
    pub stream: WriteStreamHandle,
    pub rows: i64,
    pub commit_time: DateTime<Utc>,
}

/// Writes batches to the staging table through pending streams
pub struct BatchWriter {
    writer: Arc<dyn StreamingWriter>,
    table: TablePath,
    schema: DescriptorProto,
    max_rows_per_append: usize,
}

impl BatchWriter {
    pub fn new(writer: Arc<dyn StreamingWriter>, table: TablePath) -> Self {
        Self {
            writer,
            table,
            schema: write_schema(),
            max_rows_per_append: DEFAULT_MAX_ROWS_PER_APPEND,
        }
    }

    pub fn with_max_rows_per_append(mut self, max_rows: usize) -> Self {
        self.max_rows_per_append = max_rows.max(1);
        self
    }

    pub fn table(&self) -> &TablePath {
        &self.table
    }

    fn chunks(&self, batch: &Batch) -> Vec<RowChunk> {
        batch
            .records
            .chunks(self.max_rows_per_append)
            .scan(0i64, |offset, records| {
                let chunk = RowChunk {
                    offset: *offset,
                    rows: records.iter().map(encode_row).collect(),
                };
                *offset += records.len() as i64;
                Some(chunk)
            })
            .collect()
    }

    /// Write one batch. Returns `None` for an empty batch, which makes no
    /// warehouse calls.
    pub async fn write_batch(&self, batch: &Batch) -> ExporterResult<Option<WriteSummary>> {
        if batch.is_empty() {
            debug!(metric = %batch.metric_key, "Skipping empty batch");
            return Ok(None);
        }

        let stream = self.writer.create_pending_stream(&self.table).await?;
        let chunks = self.chunks(batch);
        let requests = chunks.len();

        let appended = self.writer.append(&stream, &self.schema, chunks).await?;
        let finalized = self.writer.finalize(&stream).await?;
        if finalized != appended {
            return Err(ExporterError::write(
                WriteStage::Finalize,
                format!(
                    "stream {} finalized with {} rows, expected {}",
                    stream.name, finalized, appended
                ),
            ));
        }

        let commit_time = self
            .writer
            .commit(&self.table, std::slice::from_ref(&stream))
            .await?;

        info!(
            metric = %batch.metric_key,
            stream = %stream.name,
            rows = finalized,
            append_requests = requests,
            commit_time = %commit_time,
            "Committed batch"
        );

        Ok(Some(WriteSummary {
            metric_key: batch.metric_key.clone(),
            stream,
            rows: finalized,
            commit_time,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlatMetricRecord;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        calls: Vec<String>,
        pending: Vec<Vec<u8>>,
        finalized: bool,
        visible: Vec<Vec<u8>>,
        offsets: Vec<i64>,
    }

    /// Single-stream writer that can fail at one stage
    #[derive(Default)]
    struct RecordingWriter {
        state: Mutex<State>,
        fail_at: Option<WriteStage>,
    }

    impl RecordingWriter {
        fn failing(stage: WriteStage) -> Self {
            Self {
                fail_at: Some(stage),
                ..Default::default()
            }
        }

        fn check(&self, stage: WriteStage) -> ExporterResult<()> {
            self.state.lock().unwrap().calls.push(stage.to_string());
            match self.fail_at {
                Some(s) if s == stage => Err(ExporterError::write(stage, "injected")),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl StreamingWriter for RecordingWriter {
        async fn create_pending_stream(&self, _: &TablePath) -> ExporterResult<WriteStreamHandle> {
            self.check(WriteStage::Create)?;
            Ok(WriteStreamHandle {
                name: "streams/s1".to_string(),
            })
        }

        async fn append(
            &self,
            _: &WriteStreamHandle,
            _: &DescriptorProto,
            chunks: Vec<RowChunk>,
        ) -> ExporterResult<i64> {
            self.check(WriteStage::Append)?;
            let mut state = self.state.lock().unwrap();
            let mut rows = 0;
            for chunk in chunks {
                state.offsets.push(chunk.offset);
                rows += chunk.rows.len() as i64;
                state.pending.extend(chunk.rows);
            }
            Ok(rows)
        }

        async fn finalize(&self, _: &WriteStreamHandle) -> ExporterResult<i64> {
            self.check(WriteStage::Finalize)?;
            let mut state = self.state.lock().unwrap();
            state.finalized = true;
            Ok(state.pending.len() as i64)
        }

        async fn commit(&self, _: &TablePath, _: &[WriteStreamHandle]) -> ExporterResult<DateTime<Utc>> {
            self.check(WriteStage::Commit)?;
            let mut state = self.state.lock().unwrap();
            assert!(state.finalized, "commit before finalize");
            let rows = std::mem::take(&mut state.pending);
            state.visible.extend(rows);
            Ok(Utc.timestamp_opt(1_700_000_100, 0).unwrap())
        }
    }

    fn batch(n: usize) -> Batch {
        let mut batch = Batch::new("container_count");
        batch.records = (0..n)
            .map(|i| FlatMetricRecord {
                metric_name: "container_count".to_string(),
                location: "us-central1".to_string(),
                project_id: "proj".to_string(),
                cluster_name: "prod".to_string(),
                controller_name: format!("app-{i}"),
                controller_type: "Deployment".to_string(),
                namespace_name: "shop".to_string(),
                points: i as i64,
                timestamp_seconds: 1_700_000_000,
            })
            .collect();
        batch
    }

    fn table() -> TablePath {
        TablePath::new("proj", "metric_export", "mql_metrics")
    }

    #[tokio::test]
    async fn test_committed_rows_become_visible() {
        let writer = Arc::new(RecordingWriter::default());
        let batch_writer = BatchWriter::new(writer.clone(), table()).with_max_rows_per_append(2);

        let summary = batch_writer.write_batch(&batch(5)).await.unwrap().unwrap();

        assert_eq!(summary.rows, 5);
        let state = writer.state.lock().unwrap();
        assert_eq!(state.visible.len(), 5);
        assert_eq!(state.offsets, vec![0, 2, 4]);
        assert_eq!(state.calls, vec!["create", "append", "finalize", "commit"]);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let writer = Arc::new(RecordingWriter::default());
        let batch_writer = BatchWriter::new(writer.clone(), table());

        let summary = batch_writer.write_batch(&Batch::new("hpa_cpu")).await.unwrap();

        assert!(summary.is_none());
        assert!(writer.state.lock().unwrap().calls.is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_nothing_visible() {
        let writer = Arc::new(RecordingWriter::failing(WriteStage::Commit));
        let batch_writer = BatchWriter::new(writer.clone(), table());

        let err = batch_writer.write_batch(&batch(3)).await.unwrap_err();

        assert!(matches!(
            err,
            ExporterError::Write {
                stage: WriteStage::Commit,
                ..
            }
        ));
        let state = writer.state.lock().unwrap();
        assert!(state.finalized);
        assert!(state.visible.is_empty());
    }

    #[tokio::test]
    async fn test_append_failure_stops_before_finalize() {
        let writer = Arc::new(RecordingWriter::failing(WriteStage::Append));
        let batch_writer = BatchWriter::new(writer.clone(), table());

        assert!(batch_writer.write_batch(&batch(1)).await.is_err());
        assert_eq!(writer.state.lock().unwrap().calls, vec!["create", "append"]);
    }
}
