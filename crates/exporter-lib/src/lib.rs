//! Exporter library for GKE workload metrics
//!
//! This crate provides the core functionality for:
//! - Querying workload and autoscaler metrics from Cloud Monitoring
//! - Normalizing values into flat per-workload records
//! - Durable batch writes to a BigQuery staging table
//! - Materializing the latest recommendation snapshot
//! - Observability

pub mod auth;
pub mod catalog;
pub mod collector;
pub mod error;
pub mod materializer;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod purge;
pub mod query;
pub mod units;
pub mod warehouse;
pub mod writer;

pub use catalog::MetricCatalog;
pub use error::{ExporterError, ExporterResult};
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger};
pub use pipeline::{Pipeline, RunSummary};
