//! gRPC implementation of [`StreamingWriter`] over the Storage Write API

use super::proto::{
    append_rows_request, append_rows_response, AppendRowsRequest, BatchCommitWriteStreamsRequest,
    BigQueryWriteClient, CreateWriteStreamRequest, FinalizeWriteStreamRequest, ProtoData, ProtoRows,
    ProtoSchema, WriteStream, WriteStreamType,
};
use super::{RowChunk, StreamingWriter, WriteStreamHandle};
use crate::auth::TokenSource;
use crate::error::{ExporterError, ExporterResult, WriteStage};
use crate::models::TablePath;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use prost_types::DescriptorProto;
use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, ClientTlsConfig};
use tracing::{debug, info};

/// Public Storage Write API endpoint
pub const DEFAULT_STORAGE_WRITE_ENDPOINT: &str = "https://bigquerystorage.googleapis.com";

/// Configuration for the Storage Write client
#[derive(Debug, Clone)]
pub struct StorageWriteConfig {
    pub endpoint: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for StorageWriteConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_STORAGE_WRITE_ENDPOINT.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Storage Write API client bound to one channel
pub struct StorageWriteClient {
    channel: Channel,
    tokens: Arc<dyn TokenSource>,
}

impl StorageWriteClient {
    /// Connect to the endpoint, using TLS for `https` endpoints
    pub async fn connect(
        config: &StorageWriteConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> ExporterResult<Self> {
        let mut endpoint = Channel::from_shared(config.endpoint.clone())
            .map_err(|e| {
                ExporterError::Transport(format!("invalid endpoint {}: {}", config.endpoint, e))
            })?
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout);

        if config.endpoint.starts_with("https://") {
            let tls = ClientTlsConfig::new().domain_name(extract_domain(&config.endpoint)?);
            endpoint = endpoint.tls_config(tls)?;
        }

        let channel = endpoint.connect().await.map_err(|e| {
            ExporterError::Transport(format!("failed to connect to {}: {}", config.endpoint, e))
        })?;

        info!(endpoint = %config.endpoint, "Connected to BigQuery Storage Write API");
        Ok(Self { channel, tokens })
    }

    fn client(&self) -> BigQueryWriteClient<Channel> {
        BigQueryWriteClient::new(self.channel.clone())
    }

    /// Wrap a message with credentials and the routing header
    async fn request<T>(
        &self,
        message: T,
        routing_key: &str,
        routing_value: &str,
        stage: WriteStage,
    ) -> ExporterResult<tonic::Request<T>> {
        let token = self.tokens.access_token().await?;
        let mut request = tonic::Request::new(message);

        let bearer = MetadataValue::try_from(format!("Bearer {}", token))
            .map_err(|e| ExporterError::write(stage, format!("invalid token: {}", e)))?;
        request.metadata_mut().insert("authorization", bearer);

        let params = url::form_urlencoded::Serializer::new(String::new())
            .append_pair(routing_key, routing_value)
            .finish();
        let params = MetadataValue::try_from(params)
            .map_err(|e| ExporterError::write(stage, format!("invalid routing header: {}", e)))?;
        request.metadata_mut().insert("x-goog-request-params", params);

        Ok(request)
    }
}

fn extract_domain(endpoint: &str) -> ExporterResult<String> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| ExporterError::Transport(format!("invalid endpoint {}: {}", endpoint, e)))?;
    url.host_str()
        .map(|s| s.to_string())
        .ok_or_else(|| ExporterError::Transport(format!("no host in endpoint {}", endpoint)))
}

fn status_error(stage: WriteStage, status: tonic::Status) -> ExporterError {
    ExporterError::write(stage, format!("{:?}: {}", status.code(), status.message()))
}

/// Build the append requests for one stream. The first request carries the
/// stream name and writer schema; later ones only carry rows and offsets.
pub(crate) fn append_requests(
    stream: &WriteStreamHandle,
    schema: &DescriptorProto,
    chunks: Vec<RowChunk>,
) -> Vec<AppendRowsRequest> {
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let first = i == 0;
            AppendRowsRequest {
                write_stream: if first { stream.name.clone() } else { String::new() },
                offset: Some(chunk.offset),
                trace_id: String::new(),
                rows: Some(append_rows_request::Rows::ProtoRows(ProtoData {
                    writer_schema: first.then(|| ProtoSchema {
                        proto_descriptor: Some(schema.clone()),
                    }),
                    rows: Some(ProtoRows {
                        serialized_rows: chunk.rows,
                    }),
                })),
            }
        })
        .collect()
}

#[async_trait]
impl StreamingWriter for StorageWriteClient {
    async fn create_pending_stream(&self, table: &TablePath) -> ExporterResult<WriteStreamHandle> {
        let parent = table.storage_path();
        let message = CreateWriteStreamRequest {
            parent: parent.clone(),
            write_stream: Some(WriteStream {
                r#type: WriteStreamType::Pending as i32,
                ..Default::default()
            }),
        };
        let request = self.request(message, "parent", &parent, WriteStage::Create).await?;

        let stream = self
            .client()
            .create_write_stream(request)
            .await
            .map_err(|s| status_error(WriteStage::Create, s))?
            .into_inner();

        debug!(stream = %stream.name, "Created pending write stream");
        Ok(WriteStreamHandle { name: stream.name })
    }

    async fn append(
        &self,
        stream: &WriteStreamHandle,
        schema: &DescriptorProto,
        chunks: Vec<RowChunk>,
    ) -> ExporterResult<i64> {
        let expected_rows: i64 = chunks.iter().map(|c| c.rows.len() as i64).sum();
        let requests = append_requests(stream, schema, chunks);
        let expected_acks = requests.len();

        let request = self
            .request(
                tokio_stream::iter(requests),
                "write_stream",
                &stream.name,
                WriteStage::Append,
            )
            .await?;

        let mut responses = self
            .client()
            .append_rows(request)
            .await
            .map_err(|s| status_error(WriteStage::Append, s))?
            .into_inner();

        // the request stream ends after the last chunk, which half-closes
        // the channel; the server answers once per request and then ends
        let mut acks = 0usize;
        while let Some(response) = responses
            .message()
            .await
            .map_err(|s| status_error(WriteStage::Append, s))?
        {
            if let Some(row_error) = response.row_errors.first() {
                return Err(ExporterError::write(
                    WriteStage::Append,
                    format!(
                        "{} row errors, first at row {}: {}",
                        response.row_errors.len(),
                        row_error.index,
                        row_error.message
                    ),
                ));
            }
            match response.response {
                Some(append_rows_response::Response::AppendResult(_)) => acks += 1,
                Some(append_rows_response::Response::Error(status)) => {
                    return Err(ExporterError::write(
                        WriteStage::Append,
                        format!("code {}: {}", status.code, status.message),
                    ));
                }
                None => {}
            }
        }

        if acks != expected_acks {
            return Err(ExporterError::write(
                WriteStage::Append,
                format!(
                    "append channel closed after {} of {} acknowledgements",
                    acks, expected_acks
                ),
            ));
        }

        Ok(expected_rows)
    }

    async fn finalize(&self, stream: &WriteStreamHandle) -> ExporterResult<i64> {
        let message = FinalizeWriteStreamRequest {
            name: stream.name.clone(),
        };
        let request = self
            .request(message, "name", &stream.name, WriteStage::Finalize)
            .await?;

        let response = self
            .client()
            .finalize_write_stream(request)
            .await
            .map_err(|s| status_error(WriteStage::Finalize, s))?
            .into_inner();

        Ok(response.row_count)
    }

    async fn commit(
        &self,
        table: &TablePath,
        streams: &[WriteStreamHandle],
    ) -> ExporterResult<DateTime<Utc>> {
        let parent = table.storage_path();
        let message = BatchCommitWriteStreamsRequest {
            parent: parent.clone(),
            write_streams: streams.iter().map(|s| s.name.clone()).collect(),
        };
        let request = self.request(message, "parent", &parent, WriteStage::Commit).await?;

        let response = self
            .client()
            .batch_commit_write_streams(request)
            .await
            .map_err(|s| status_error(WriteStage::Commit, s))?
            .into_inner();

        if let Some(err) = response.stream_errors.first() {
            return Err(ExporterError::write(
                WriteStage::Commit,
                format!("{}: {}", err.entity, err.error_message),
            ));
        }

        let commit_time = response.commit_time.ok_or_else(|| {
            ExporterError::write(WriteStage::Commit, "commit returned no commit time")
        })?;

        Utc.timestamp_opt(commit_time.seconds, commit_time.nanos.max(0) as u32)
            .single()
            .ok_or_else(|| ExporterError::write(WriteStage::Commit, "invalid commit time"))
    }
}
