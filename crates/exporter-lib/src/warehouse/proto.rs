//! BigQuery Storage Write API messages and client
//!
//! Hand-written prost types for the subset of
//! `google.cloud.bigquery.storage.v1` used by the pending-stream protocol,
//! plus the matching tonic client. Field tags follow the published proto.

pub mod storage {
    pub mod v1 {
        use prost::Message;

        #[derive(Clone, PartialEq, Message)]
        pub struct WriteStream {
            #[prost(string, tag = "1")]
            pub name: String,
            #[prost(int32, tag = "2")]
            pub r#type: i32,
            #[prost(message, optional, tag = "3")]
            pub create_time: Option<prost_types::Timestamp>,
            #[prost(message, optional, tag = "4")]
            pub commit_time: Option<prost_types::Timestamp>,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(i32)]
        pub enum WriteStreamType {
            #[default]
            Unspecified = 0,
            Committed = 1,
            Pending = 2,
            Buffered = 3,
        }

        impl WriteStreamType {
            pub fn as_str_name(&self) -> &'static str {
                match self {
                    WriteStreamType::Unspecified => "TYPE_UNSPECIFIED",
                    WriteStreamType::Committed => "COMMITTED",
                    WriteStreamType::Pending => "PENDING",
                    WriteStreamType::Buffered => "BUFFERED",
                }
            }
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct CreateWriteStreamRequest {
            #[prost(string, tag = "1")]
            pub parent: String,
            #[prost(message, optional, tag = "2")]
            pub write_stream: Option<WriteStream>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ProtoSchema {
            #[prost(message, optional, tag = "1")]
            pub proto_descriptor: Option<prost_types::DescriptorProto>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ProtoRows {
            #[prost(bytes = "vec", repeated, tag = "1")]
            pub serialized_rows: Vec<Vec<u8>>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ProtoData {
            #[prost(message, optional, tag = "1")]
            pub writer_schema: Option<ProtoSchema>,
            #[prost(message, optional, tag = "2")]
            pub rows: Option<ProtoRows>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct AppendRowsRequest {
            #[prost(string, tag = "1")]
            pub write_stream: String,
            #[prost(message, optional, tag = "2")]
            pub offset: Option<i64>,
            #[prost(string, tag = "6")]
            pub trace_id: String,
            #[prost(oneof = "append_rows_request::Rows", tags = "4")]
            pub rows: Option<append_rows_request::Rows>,
        }

        pub mod append_rows_request {
            #[derive(Clone, PartialEq, prost::Oneof)]
            pub enum Rows {
                #[prost(message, tag = "4")]
                ProtoRows(super::ProtoData),
            }
        }

        /// `google.rpc.Status` without the details payload
        #[derive(Clone, PartialEq, Message)]
        pub struct RpcStatus {
            #[prost(int32, tag = "1")]
            pub code: i32,
            #[prost(string, tag = "2")]
            pub message: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct AppendResult {
            #[prost(message, optional, tag = "1")]
            pub offset: Option<i64>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct RowError {
            #[prost(int64, tag = "1")]
            pub index: i64,
            #[prost(int32, tag = "2")]
            pub code: i32,
            #[prost(string, tag = "3")]
            pub message: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct AppendRowsResponse {
            #[prost(message, repeated, tag = "4")]
            pub row_errors: Vec<RowError>,
            #[prost(string, tag = "5")]
            pub write_stream: String,
            #[prost(oneof = "append_rows_response::Response", tags = "1, 2")]
            pub response: Option<append_rows_response::Response>,
        }

        pub mod append_rows_response {
            #[derive(Clone, PartialEq, prost::Oneof)]
            pub enum Response {
                #[prost(message, tag = "1")]
                AppendResult(super::AppendResult),
                #[prost(message, tag = "2")]
                Error(super::RpcStatus),
            }
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct FinalizeWriteStreamRequest {
            #[prost(string, tag = "1")]
            pub name: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct FinalizeWriteStreamResponse {
            #[prost(int64, tag = "1")]
            pub row_count: i64,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct BatchCommitWriteStreamsRequest {
            #[prost(string, tag = "1")]
            pub parent: String,
            #[prost(string, repeated, tag = "2")]
            pub write_streams: Vec<String>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct StorageError {
            #[prost(int32, tag = "1")]
            pub code: i32,
            #[prost(string, tag = "2")]
            pub entity: String,
            #[prost(string, tag = "3")]
            pub error_message: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct BatchCommitWriteStreamsResponse {
            #[prost(message, optional, tag = "1")]
            pub commit_time: Option<prost_types::Timestamp>,
            #[prost(message, repeated, tag = "2")]
            pub stream_errors: Vec<StorageError>,
        }

        pub mod big_query_write_client {
            use super::*;
            use tonic::codegen::*;
            use tonic::transport::Uri;

            #[derive(Debug, Clone)]
            pub struct BigQueryWriteClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl BigQueryWriteClient<tonic::transport::Channel> {
                pub fn new(channel: tonic::transport::Channel) -> Self {
                    let inner = tonic::client::Grpc::new(channel);
                    Self { inner }
                }
            }

            impl<T> BigQueryWriteClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                pub fn with_origin(inner: T, origin: Uri) -> Self {
                    let inner = tonic::client::Grpc::with_origin(inner, origin);
                    Self { inner }
                }

                async fn ready(&mut self) -> Result<(), tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })
                }

                pub async fn create_write_stream(
                    &mut self,
                    request: impl tonic::IntoRequest<CreateWriteStreamRequest>,
                ) -> Result<tonic::Response<WriteStream>, tonic::Status> {
                    self.ready().await?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/google.cloud.bigquery.storage.v1.BigQueryWrite/CreateWriteStream",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }

                pub async fn append_rows(
                    &mut self,
                    request: impl tonic::IntoStreamingRequest<Message = AppendRowsRequest>,
                ) -> Result<tonic::Response<tonic::codec::Streaming<AppendRowsResponse>>, tonic::Status>
                {
                    self.ready().await?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/google.cloud.bigquery.storage.v1.BigQueryWrite/AppendRows",
                    );
                    self.inner
                        .streaming(request.into_streaming_request(), path, codec)
                        .await
                }

                pub async fn finalize_write_stream(
                    &mut self,
                    request: impl tonic::IntoRequest<FinalizeWriteStreamRequest>,
                ) -> Result<tonic::Response<FinalizeWriteStreamResponse>, tonic::Status> {
                    self.ready().await?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/google.cloud.bigquery.storage.v1.BigQueryWrite/FinalizeWriteStream",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }

                pub async fn batch_commit_write_streams(
                    &mut self,
                    request: impl tonic::IntoRequest<BatchCommitWriteStreamsRequest>,
                ) -> Result<tonic::Response<BatchCommitWriteStreamsResponse>, tonic::Status>
                {
                    self.ready().await?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/google.cloud.bigquery.storage.v1.BigQueryWrite/BatchCommitWriteStreams",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }
            }
        }
    }
}

pub use storage::v1::big_query_write_client::BigQueryWriteClient;
pub use storage::v1::*;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_offset_wrapper_encoding() {
        let request = AppendRowsRequest {
            write_stream: "s".to_string(),
            offset: Some(0),
            trace_id: String::new(),
            rows: None,
        };
        let decoded = AppendRowsRequest::decode(request.encode_to_vec().as_slice()).unwrap();
        // a zero offset must survive as an explicit wrapper, not collapse to unset
        assert_eq!(decoded.offset, Some(0));
    }

    #[test]
    fn test_append_response_error_variant() {
        let response = AppendRowsResponse {
            row_errors: vec![],
            write_stream: String::new(),
            response: Some(append_rows_response::Response::Error(RpcStatus {
                code: 3,
                message: "bad row".to_string(),
            })),
        };
        let decoded = AppendRowsResponse::decode(response.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_stream_type_names() {
        assert_eq!(WriteStreamType::Pending as i32, 2);
        assert_eq!(WriteStreamType::Pending.as_str_name(), "PENDING");
    }
}
