//! BigQuery `jobs.query` client implementing [`SqlExecutor`]

use super::{QueryOutcome, SqlExecutor};
use crate::auth::TokenSource;
use crate::error::{ExporterError, ExporterResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Public BigQuery REST endpoint
pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";

/// Configuration for the jobs client
#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub endpoint: String,
    pub project_id: String,
    pub request_timeout: Duration,
    /// Server-side wait per call, in milliseconds
    pub wait_timeout_ms: u64,
    /// Upper bound on completion polls for a single job
    pub max_polls: u32,
}

impl JobsConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_BIGQUERY_ENDPOINT.to_string(),
            project_id: project_id.into(),
            request_timeout: Duration::from_secs(60),
            wait_timeout_ms: 10_000,
            max_polls: 360,
        }
    }
}

/// REST client that runs SQL and waits for the job to complete
pub struct BigQueryJobsClient {
    client: reqwest::Client,
    config: JobsConfig,
    tokens: Arc<dyn TokenSource>,
}

impl BigQueryJobsClient {
    pub fn new(config: JobsConfig, tokens: Arc<dyn TokenSource>) -> ExporterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project_id
        )
    }

    async fn parse(response: reqwest::Response) -> ExporterResult<QueryResponse> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExporterError::Sql(format!("status {}: {}", status.as_u16(), body)));
        }
        response
            .json()
            .await
            .map_err(|e| ExporterError::Sql(format!("invalid query response: {}", e)))
    }

    async fn start(&self, sql: &str) -> ExporterResult<QueryResponse> {
        let token = self.tokens.access_token().await?;
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            timeout_ms: self.config.wait_timeout_ms,
        };
        let response = self
            .client
            .post(self.queries_url())
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn poll(&self, job: &JobReference) -> ExporterResult<QueryResponse> {
        let token = self.tokens.access_token().await?;
        let mut params = vec![("timeoutMs", self.config.wait_timeout_ms.to_string())];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        let response = self
            .client
            .get(format!("{}/{}", self.queries_url(), job.job_id))
            .bearer_auth(token)
            .query(&params)
            .send()
            .await?;
        Self::parse(response).await
    }
}

#[async_trait]
impl SqlExecutor for BigQueryJobsClient {
    async fn execute(&self, sql: &str) -> ExporterResult<QueryOutcome> {
        let mut response = self.start(sql).await?;
        let mut polls = 0u32;

        while !response.job_complete {
            let job = response
                .job_reference
                .clone()
                .ok_or_else(|| ExporterError::Sql("incomplete job without a reference".into()))?;
            if polls >= self.config.max_polls {
                return Err(ExporterError::Sql(format!(
                    "job {} still running after {} polls",
                    job.job_id, polls
                )));
            }
            polls += 1;
            debug!(job_id = %job.job_id, polls = polls, "Waiting for query job");
            response = self.poll(&job).await?;
        }

        let affected_rows = response
            .num_dml_affected_rows
            .as_deref()
            .map(|n| {
                n.parse::<i64>()
                    .map_err(|e| ExporterError::Sql(format!("invalid affected row count {}: {}", n, e)))
            })
            .transpose()?;

        Ok(QueryOutcome {
            job_id: response.job_reference.map(|j| j.job_id),
            affected_rows,
            rows: response.rows,
        })
    }
}

// Wire types for jobs.query / jobs.getQueryResults

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    timeout_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    rows: Vec<serde_json::Value>,
    /// int64 encoded as a string
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}
