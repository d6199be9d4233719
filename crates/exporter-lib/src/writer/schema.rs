//! Wire row for the staging table and its self-describing schema

use crate::models::FlatMetricRecord;
use prost::Message;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto};

/// Staging table row. Every field uses explicit presence so zero values are
/// written as zeros rather than NULLs.
#[derive(Clone, PartialEq, Message)]
pub struct FlatMetricRow {
    #[prost(string, optional, tag = "1")]
    pub metric_name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub location: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub project_id: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub cluster_name: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub controller_name: Option<String>,
    #[prost(string, optional, tag = "6")]
    pub controller_type: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub namespace_name: Option<String>,
    #[prost(int64, optional, tag = "8")]
    pub points: Option<i64>,
    /// Run timestamp, seconds since the epoch
    #[prost(int64, optional, tag = "9")]
    pub tstamp: Option<i64>,
}

impl From<&FlatMetricRecord> for FlatMetricRow {
    fn from(record: &FlatMetricRecord) -> Self {
        Self {
            metric_name: Some(record.metric_name.clone()),
            location: Some(record.location.clone()),
            project_id: Some(record.project_id.clone()),
            cluster_name: Some(record.cluster_name.clone()),
            controller_name: Some(record.controller_name.clone()),
            controller_type: Some(record.controller_type.clone()),
            namespace_name: Some(record.namespace_name.clone()),
            points: Some(record.points),
            tstamp: Some(record.timestamp_seconds),
        }
    }
}

/// Serialize a record into the bytes carried by an append request
pub fn encode_row(record: &FlatMetricRecord) -> Vec<u8> {
    FlatMetricRow::from(record).encode_to_vec()
}

const ROW_MESSAGE_NAME: &str = "FlatMetricRow";

const ROW_FIELDS: &[(&str, i32, Type)] = &[
    ("metric_name", 1, Type::String),
    ("location", 2, Type::String),
    ("project_id", 3, Type::String),
    ("cluster_name", 4, Type::String),
    ("controller_name", 5, Type::String),
    ("controller_type", 6, Type::String),
    ("namespace_name", 7, Type::String),
    ("points", 8, Type::Int64),
    ("tstamp", 9, Type::Int64),
];

/// Descriptor of [`FlatMetricRow`] sent as the writer schema
pub fn write_schema() -> DescriptorProto {
    DescriptorProto {
        name: Some(ROW_MESSAGE_NAME.to_string()),
        field: ROW_FIELDS
            .iter()
            .map(|(name, number, ty)| FieldDescriptorProto {
                name: Some(name.to_string()),
                number: Some(*number),
                label: Some(Label::Optional as i32),
                r#type: Some(*ty as i32),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}
