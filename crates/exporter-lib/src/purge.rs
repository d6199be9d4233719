//! Staging table retention

use crate::error::ExporterResult;
use crate::models::{RunContext, TablePath};
use crate::warehouse::SqlExecutor;
use std::sync::Arc;
use tracing::info;

/// Staging rows older than this, relative to the run timestamp, are purged
pub const STAGING_RETENTION_SECONDS: i64 = 5400;

/// Deletes expired rows from the staging table
pub struct StagingPurge {
    executor: Arc<dyn SqlExecutor>,
    table: TablePath,
}

impl StagingPurge {
    pub fn new(executor: Arc<dyn SqlExecutor>, table: TablePath) -> Self {
        Self { executor, table }
    }

    pub fn statement(&self, ctx: &RunContext) -> String {
        let cutoff = ctx.timestamp_seconds() - STAGING_RETENTION_SECONDS;
        format!("DELETE `{}` WHERE tstamp < {}", self.table, cutoff)
    }

    /// Run the purge; returns the number of deleted rows
    pub async fn purge(&self, ctx: &RunContext) -> ExporterResult<i64> {
        let outcome = self.executor.execute(&self.statement(ctx)).await?;
        let deleted = outcome.affected_rows.unwrap_or(0);
        info!(table = %self.table, deleted_rows = deleted, "Purged staging table");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::QueryOutcome;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    /// Table of row timestamps that understands the purge statement
    struct TimestampTable {
        rows: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl SqlExecutor for TimestampTable {
        async fn execute(&self, sql: &str) -> ExporterResult<QueryOutcome> {
            let cutoff: i64 = sql
                .rsplit("tstamp < ")
                .next()
                .and_then(|s| s.trim().parse().ok())
                .expect("purge statement");
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|t| *t >= cutoff);
            Ok(QueryOutcome {
                affected_rows: Some((before - rows.len()) as i64),
                ..Default::default()
            })
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    #[test]
    fn test_statement_uses_run_timestamp() {
        let table = Arc::new(TimestampTable {
            rows: Mutex::new(vec![]),
        });
        let purge = StagingPurge::new(table, TablePath::new("p", "d", "t"));
        assert_eq!(
            purge.statement(&ctx()),
            "DELETE `p.d.t` WHERE tstamp < 1699994600"
        );
    }

    #[tokio::test]
    async fn test_purge_is_idempotent() {
        let table = Arc::new(TimestampTable {
            rows: Mutex::new(vec![1_699_990_000, 1_699_994_599, 1_699_994_600, 1_700_000_000]),
        });
        let purge = StagingPurge::new(table.clone(), TablePath::new("p", "d", "t"));

        assert_eq!(purge.purge(&ctx()).await.unwrap(), 2);
        assert_eq!(purge.purge(&ctx()).await.unwrap(), 0);
        assert_eq!(*table.rows.lock().unwrap(), vec![1_699_994_600, 1_700_000_000]);
    }
}
