//! Cloud Monitoring `timeSeries.list` client
//!
//! Issues aggregated list requests over REST, follows pagination and maps
//! the JSON response onto [`TimeSeries`].

use super::{Point, TimeSeries, TimeSeriesQuery, TimeSeriesSource};
use crate::auth::TokenSource;
use crate::error::{ExporterError, ExporterResult};
use crate::models::TypedValue;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Public Cloud Monitoring endpoint
pub const DEFAULT_MONITORING_ENDPOINT: &str = "https://monitoring.googleapis.com";

/// Configuration for the monitoring client
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Base endpoint, without the `/v3` path
    pub endpoint: String,
    /// Project whose time series are listed
    pub project_id: String,
    /// Request timeout
    pub request_timeout: Duration,
    /// Page size requested from the service
    pub page_size: u32,
}

impl MonitoringConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_MONITORING_ENDPOINT.to_string(),
            project_id: project_id.into(),
            request_timeout: Duration::from_secs(60),
            page_size: 10_000,
        }
    }
}

/// REST client for Cloud Monitoring
pub struct MonitoringClient {
    client: reqwest::Client,
    config: MonitoringConfig,
    tokens: Arc<dyn TokenSource>,
}

impl MonitoringClient {
    pub fn new(config: MonitoringConfig, tokens: Arc<dyn TokenSource>) -> ExporterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    fn list_url(&self) -> String {
        format!(
            "{}/v3/projects/{}/timeSeries",
            self.config.endpoint.trim_end_matches('/'),
            self.config.project_id
        )
    }

    fn query_params(&self, query: &TimeSeriesQuery, page_token: Option<&str>) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(token) = page_token {
            params.push(("pageToken".to_string(), token.to_string()));
        }
        params.push(("filter".to_string(), query.filter.clone()));
        params.push(("interval.startTime".to_string(), rfc3339(query.interval.start_time)));
        params.push(("interval.endTime".to_string(), rfc3339(query.interval.end_time)));
        params.push((
            "aggregation.alignmentPeriod".to_string(),
            format!("{}s", query.aggregation.alignment_period_seconds),
        ));
        params.push((
            "aggregation.perSeriesAligner".to_string(),
            query.aggregation.per_series_aligner.as_api_name().to_string(),
        ));
        params.push((
            "aggregation.crossSeriesReducer".to_string(),
            query.aggregation.cross_series_reducer.as_api_name().to_string(),
        ));
        for field in &query.aggregation.group_by_fields {
            params.push(("aggregation.groupByFields".to_string(), field.clone()));
        }
        params.push(("view".to_string(), "FULL".to_string()));
        params.push(("pageSize".to_string(), self.config.page_size.to_string()));
        params
    }

    async fn fetch_page(
        &self,
        query: &TimeSeriesQuery,
        page_token: Option<&str>,
    ) -> ExporterResult<ListTimeSeriesResponse> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .get(self.list_url())
            .bearer_auth(token)
            .query(&self.query_params(query, page_token))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ExporterError::MetricNotFound(query.metric_type.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExporterError::Query {
                status: status.as_u16(),
                message: body,
            });
        }

        response.json().await.map_err(|e| ExporterError::Query {
            status: status.as_u16(),
            message: format!("invalid timeSeries response: {}", e),
        })
    }
}

#[async_trait]
impl TimeSeriesSource for MonitoringClient {
    async fn query(&self, query: &TimeSeriesQuery) -> ExporterResult<Vec<TimeSeries>> {
        let mut series = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self.fetch_page(query, page_token.as_deref()).await?;
            pages += 1;
            series.extend(page.time_series.into_iter().map(TimeSeries::from));

            if page.next_page_token.is_empty() {
                break;
            }
            page_token = Some(page.next_page_token);
        }

        debug!(
            metric_type = %query.metric_type,
            pages = pages,
            series = series.len(),
            "Listed time series"
        );
        Ok(series)
    }
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// Wire types for timeSeries.list

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListTimeSeriesResponse {
    #[serde(default)]
    time_series: Vec<ApiTimeSeries>,
    #[serde(default)]
    next_page_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTimeSeries {
    #[serde(default)]
    metric: ApiLabels,
    #[serde(default)]
    resource: ApiLabels,
    #[serde(default)]
    metadata: ApiMetadata,
    #[serde(default)]
    points: Vec<ApiPoint>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiLabels {
    #[serde(default)]
    labels: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMetadata {
    #[serde(default)]
    system_labels: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPoint {
    #[serde(default)]
    interval: Option<ApiInterval>,
    #[serde(default)]
    value: ApiTypedValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInterval {
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiTypedValue {
    #[serde(default)]
    double_value: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_int64")]
    int64_value: Option<i64>,
}

/// int64 values are JSON strings in Google APIs; accept plain numbers too
fn deserialize_int64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

impl From<ApiTimeSeries> for TimeSeries {
    fn from(api: ApiTimeSeries) -> Self {
        let system_labels = api
            .metadata
            .system_labels
            .into_iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k, s)),
                _ => None,
            })
            .collect();

        let points = api
            .points
            .into_iter()
            .map(|p| Point {
                end_time: p.interval.and_then(|i| i.end_time),
                value: TypedValue {
                    double_value: p.value.double_value,
                    int64_value: p.value.int64_value,
                },
            })
            .collect();

        TimeSeries {
            metric_labels: api.metric.labels,
            resource_labels: api.resource.labels,
            system_labels,
            points,
        }
    }
}
