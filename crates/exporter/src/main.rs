//! Metrics Exporter - GKE workload metrics to BigQuery
//!
//! This binary runs as a scheduled batch job. Each run queries workload
//! utilization and autoscaler recommendation metrics, commits them to a
//! staging table and rebuilds the latest recommendation snapshot.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exporter_lib::auth::{MetadataServerToken, StaticToken, TokenSource};
use exporter_lib::catalog::MetricCatalog;
use exporter_lib::collector::{RecommendationCollector, SnapshotCollector};
use exporter_lib::materializer::{RecommendationMaterializer, RecommendationTemplate};
use exporter_lib::models::RunContext;
use exporter_lib::observability::{ExporterMetrics, StructuredLogger};
use exporter_lib::pipeline::Pipeline;
use exporter_lib::purge::StagingPurge;
use exporter_lib::query::{MonitoringClient, MonitoringConfig};
use exporter_lib::warehouse::{
    BigQueryJobsClient, JobsConfig, SqlExecutor, StorageWriteClient, StorageWriteConfig,
};
use exporter_lib::writer::BatchWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

use config::ExporterConfig;

const EXPORTER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "metrics-exporter", version, about)]
struct Cli {
    /// Configuration file, read before the environment
    #[arg(long, global = true, env = "EXPORTER_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Write the Prometheus text exposition here on exit
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Collect, commit and materialize (default)
    Run,
    /// Delete expired staging rows
    Purge,
    /// Rebuild the latest recommendation snapshot
    Materialize,
    /// Print the effective metric catalog as JSON
    Catalog,
    /// Print the exporter version
    Version,
}

/// Cloud Run job task identity, used in the failure line
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskInfo {
    index: String,
    attempt: String,
}

impl TaskInfo {
    fn from_env() -> Self {
        Self {
            index: std::env::var("CLOUD_RUN_TASK_INDEX").unwrap_or_else(|_| "0".to_string()),
            attempt: std::env::var("CLOUD_RUN_TASK_ATTEMPT").unwrap_or_else(|_| "0".to_string()),
        }
    }
}

/// Single structured line reporting a failed run
fn failure_line(task: &TaskInfo, error: &anyhow::Error) -> String {
    serde_json::json!({
        "message": format!(
            "Task #{}, Attempt #{} failed: {:#}",
            task.index, task.attempt, error
        ),
        "severity": "ERROR",
    })
    .to_string()
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let ctx = RunContext::now();
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let result = execute(&cli, &ctx).await;

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = write_metrics(path) {
            warn!(error = %e, path = %path.display(), "Failed to write metrics file");
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{}", failure_line(&TaskInfo::from_env(), &e));
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: &Cli, ctx: &RunContext) -> Result<()> {
    let command = cli.command.unwrap_or(Command::Run);
    if command == Command::Version {
        println!("metrics-exporter {}", EXPORTER_VERSION);
        return Ok(());
    }

    let config = ExporterConfig::load(cli.config.as_deref())?;
    info!(
        project = %config.project_id,
        command = ?command,
        version = EXPORTER_VERSION,
        "Exporter configured"
    );

    match command {
        Command::Run => run(&config, ctx).await,
        Command::Purge => purge(&config, ctx).await,
        Command::Materialize => materialize(&config).await,
        Command::Catalog => print_catalog(&config),
        Command::Version => Ok(()),
    }
}

fn catalog(config: &ExporterConfig) -> Result<MetricCatalog> {
    MetricCatalog::gke_default(
        config.latest_window_seconds,
        config.recommendation_window_seconds,
    )
    .context("failed to build metric catalog")
}

fn token_source(config: &ExporterConfig) -> Result<Arc<dyn TokenSource>> {
    match &config.access_token {
        Some(token) => Ok(Arc::new(StaticToken::new(token.clone()))),
        None => {
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout())
                .build()
                .context("failed to build metadata server client")?;
            Ok(Arc::new(MetadataServerToken::new(client)))
        }
    }
}

fn sql_executor(
    config: &ExporterConfig,
    tokens: Arc<dyn TokenSource>,
) -> Result<Arc<dyn SqlExecutor>> {
    let mut jobs = JobsConfig::new(&config.project_id);
    jobs.endpoint = config.bigquery_endpoint.clone();
    jobs.request_timeout = config.request_timeout();
    let client = BigQueryJobsClient::new(jobs, tokens).context("failed to build BigQuery client")?;
    Ok(Arc::new(client))
}

fn materializer(
    config: &ExporterConfig,
    executor: Arc<dyn SqlExecutor>,
) -> Result<RecommendationMaterializer> {
    let template = RecommendationTemplate::load(config.recommendation_sql_path.as_deref())
        .context("failed to load recommendation template")?;
    Ok(RecommendationMaterializer::new(
        executor,
        config.recommendation_table_path(),
        config.staging_table(),
    )
    .with_template(template)
    .with_mode(config.materialize_mode))
}

async fn run(config: &ExporterConfig, ctx: &RunContext) -> Result<()> {
    let catalog = catalog(config)?;
    let tokens = token_source(config)?;

    let mut monitoring = MonitoringConfig::new(&config.project_id);
    monitoring.endpoint = config.monitoring_endpoint.clone();
    monitoring.request_timeout = config.request_timeout();
    let source = Arc::new(
        MonitoringClient::new(monitoring, tokens.clone())
            .context("failed to build monitoring client")?,
    );

    let storage_config = StorageWriteConfig {
        endpoint: config.storage_write_endpoint.clone(),
        request_timeout: config.request_timeout(),
        ..Default::default()
    };
    let storage = StorageWriteClient::connect(&storage_config, tokens.clone())
        .await
        .context("failed to connect to the Storage Write API")?;

    let executor = sql_executor(config, tokens)?;

    let mut pipeline = Pipeline::new(
        catalog,
        Arc::new(SnapshotCollector::with_point_selection(
            source.clone(),
            config.point_selection,
        )),
        Arc::new(RecommendationCollector::with_point_selection(
            source,
            config.point_selection,
        )),
        BatchWriter::new(Arc::new(storage), config.staging_table())
            .with_max_rows_per_append(config.max_rows_per_append),
        materializer(config, executor.clone())?,
        StructuredLogger::new(&config.project_id),
    );
    if config.purge_after_run {
        pipeline = pipeline.with_purge(StagingPurge::new(executor, config.staging_table()));
    }

    let summary = pipeline.run(ctx).await.context("export run failed")?;
    info!(
        committed_rows = summary.committed_rows,
        metrics = summary.metrics.len(),
        purged_rows = ?summary.purged_rows,
        "Export run succeeded"
    );
    Ok(())
}

async fn purge(config: &ExporterConfig, ctx: &RunContext) -> Result<()> {
    let executor = sql_executor(config, token_source(config)?)?;
    let deleted = StagingPurge::new(executor, config.staging_table())
        .purge(ctx)
        .await
        .context("staging purge failed")?;
    StructuredLogger::new(&config.project_id).log_purge(&config.staging_table().to_string(), deleted);
    Ok(())
}

async fn materialize(config: &ExporterConfig) -> Result<()> {
    let executor = sql_executor(config, token_source(config)?)?;
    let outcome = materializer(config, executor)?
        .materialize()
        .await
        .context("materialization failed")?;
    StructuredLogger::new(&config.project_id)
        .log_materialization(&outcome.mode.to_string(), outcome.inserted_rows);
    Ok(())
}

fn print_catalog(config: &ExporterConfig) -> Result<()> {
    let catalog = catalog(config)?;
    let definitions: Vec<_> = catalog.iter().collect();
    println!("{}", serde_json::to_string_pretty(&definitions)?);
    Ok(())
}

fn write_metrics(path: &Path) -> Result<()> {
    let text = ExporterMetrics::new().render()?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}
