//! # taxi-lake CLI interface
//!
//! Command parsing and wiring only. Everything that decides *what* happens lives in
//! `taxi-lake-core`; this module builds the concrete GCS, BigQuery and HTTP collaborators,
//! hands them to the core pipelines, and prints the resulting report as JSON on stdout.
//!
//! Every subcommand takes `--config <yaml>` (see [`crate::load_config`]). Commands that reach
//! GCP also need `GOOGLE_OAUTH_ACCESS_TOKEN`; `render-sql` does not. `ingest` needs
//! `DATABASE_URL` instead.
use crate::bigquery::BigQueryClient;
use crate::gcs::GcsClient;
use crate::load_config::{load_config, CliConfig};
use crate::postgres::PgTableSink;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use taxi_lake_core::bucket::ensure_bucket;
use taxi_lake_core::config::WarehouseSettings;
use taxi_lake_core::coordinator::UploadCoordinator;
use taxi_lake_core::download::HttpFetcher;
use taxi_lake_core::ingest::{ensure_ingestible, ingest};
use taxi_lake_core::synchronise::{backfill, monthly};
use taxi_lake_core::task::{DatasetKind, Period, TransferTask};
use taxi_lake_core::warehouse::{TablePipeline, TableStatements};

/// CLI for taxi-lake: move NYC TLC trip files into GCS and merge them into BigQuery.
#[derive(Parser)]
#[clap(
    name = "taxi-lake",
    version,
    about = "Idempotent upload of NYC taxi trip files to GCS and BigQuery table merges"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// One month of one dataset kind.
#[derive(Args, Debug, Clone)]
pub struct PeriodArgs {
    /// Dataset kind: yellow, green, fhv or fhvhv
    #[clap(long)]
    pub kind: DatasetKind,
    #[clap(long)]
    pub year: u16,
    #[clap(long)]
    pub month: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload a single file, downloading it first if needed
    Upload {
        #[clap(long)]
        config: PathBuf,
        #[clap(long, required_unless_present = "file", requires_all = ["year", "month"])]
        kind: Option<DatasetKind>,
        #[clap(long)]
        year: Option<u16>,
        #[clap(long)]
        month: Option<u8>,
        /// Upload a file by name from the staging directory instead of a (kind, month)
        #[clap(long, conflicts_with_all = ["kind", "year", "month"])]
        file: Option<String>,
    },
    /// Load one CSV file into a Postgres table, replacing its contents
    Ingest {
        #[clap(long)]
        config: PathBuf,
        #[clap(long, required_unless_present = "file", requires_all = ["year", "month"])]
        kind: Option<DatasetKind>,
        #[clap(long)]
        year: Option<u16>,
        #[clap(long)]
        month: Option<u8>,
        /// Ingest a file by name from the staging directory instead of a (kind, month)
        #[clap(long, conflicts_with_all = ["kind", "year", "month"])]
        file: Option<String>,
        /// Target table, overriding `postgres.table`
        #[clap(long)]
        table: Option<String>,
        /// Rows per chunk, overriding `postgres.chunk_size`
        #[clap(long)]
        chunk_size: Option<usize>,
    },
    /// Upload a range of months one after another, continuing past failures
    Backfill {
        #[clap(long)]
        config: PathBuf,
        #[clap(long)]
        kind: DatasetKind,
        #[clap(long)]
        year: u16,
        /// First month (inclusive)
        #[clap(long, default_value_t = 1)]
        from: u8,
        /// Last month (inclusive)
        #[clap(long, default_value_t = 12)]
        to: u8,
    },
    /// Upload one month and merge it into the warehouse
    Monthly {
        #[clap(long)]
        config: PathBuf,
        #[clap(flatten)]
        period: PeriodArgs,
    },
    /// Build and merge warehouse tables for a month that is already uploaded
    Tables {
        #[clap(long)]
        config: PathBuf,
        #[clap(flatten)]
        period: PeriodArgs,
    },
    /// Create the configured bucket if it does not exist
    EnsureBucket {
        #[clap(long)]
        config: PathBuf,
    },
    /// Print the table pipeline statements for a month without running them
    RenderSql {
        #[clap(long)]
        config: PathBuf,
        #[clap(flatten)]
        period: PeriodArgs,
    },
}

impl PeriodArgs {
    fn task(&self, config: &CliConfig) -> Result<TransferTask> {
        let period = Period::new(self.year, self.month)?;
        Ok(TransferTask::for_period(
            self.kind,
            period,
            config.pipeline.download.format,
        ))
    }
}

/// Either a named file or a full (kind, year, month); clap enforces that one of them is given.
fn select_task(
    config: &CliConfig,
    file: Option<String>,
    kind: Option<DatasetKind>,
    year: Option<u16>,
    month: Option<u8>,
) -> Result<TransferTask> {
    match (file, kind, year, month) {
        (Some(name), _, _, _) => Ok(TransferTask::named(name)?),
        (None, Some(kind), Some(year), Some(month)) => Ok(TransferTask::for_period(
            kind,
            Period::new(year, month)?,
            config.pipeline.download.format,
        )),
        _ => anyhow::bail!("either --file or all of --kind, --year and --month are required"),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn gcs_client(config: &CliConfig) -> Result<GcsClient> {
    let token = config.require_token()?;
    GcsClient::new_from_env(&config.pipeline.project_id, token)
        .context("Failed to construct GCS client")
}

fn warehouse_settings(config: &CliConfig) -> Result<WarehouseSettings> {
    config
        .pipeline
        .warehouse
        .clone()
        .context("config has no `warehouse` section")
}

fn bigquery_client(config: &CliConfig, settings: &WarehouseSettings) -> Result<BigQueryClient> {
    let token = config.require_token()?;
    BigQueryClient::new_from_env(&settings.project_id, token)
        .context("Failed to construct BigQuery client")
}

/// Async CLI entrypoint, shared by `main` and the integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Upload {
            config,
            kind,
            year,
            month,
            file,
        } => {
            let config = load_config(config)?;
            let task = select_task(&config, file, kind, year, month)?;
            tracing::info!(command = "upload", task = %task, "Starting upload");
            let store = gcs_client(&config)?;
            let fetcher = HttpFetcher::new(&config.pipeline.download);
            let coordinator = UploadCoordinator::new(&config.pipeline, &store, &fetcher);
            let outcome = coordinator
                .ensure_uploaded(&task, config.pipeline.retry.max_retries)
                .await
                .with_context(|| format!("Upload of {} failed", task.remote_key()))?;
            print_json(&outcome)
        }
        Commands::Ingest {
            config,
            kind,
            year,
            month,
            file,
            table,
            chunk_size,
        } => {
            let config = load_config(config)?;
            let task = select_task(&config, file, kind, year, month)?;
            let mut settings = config.ingest.clone();
            if let Some(table) = table {
                settings.table = table;
            }
            if let Some(chunk_size) = chunk_size {
                settings.chunk_size = chunk_size;
            }
            settings.validate()?;
            ensure_ingestible(&task)?;
            tracing::info!(command = "ingest", task = %task, table = %settings.table, "Starting ingest");
            let url = config.require_database_url()?;
            let sink = PgTableSink::connect(url)
                .await
                .context("Failed to connect to Postgres")?;
            let fetcher = HttpFetcher::new(&config.pipeline.download);
            let report = ingest(&config.pipeline, &fetcher, &sink, &task, &settings)
                .await
                .with_context(|| format!("Ingest of {} failed", task.remote_key()))?;
            print_json(&report)
        }
        Commands::Backfill {
            config,
            kind,
            year,
            from,
            to,
        } => {
            let config = load_config(config)?;
            let tasks: Vec<TransferTask> = Period::range(year, from, to)?
                .into_iter()
                .map(|p| TransferTask::for_period(kind, p, config.pipeline.download.format))
                .collect();
            tracing::info!(command = "backfill", %kind, year, from, to, "Starting backfill");
            let store = gcs_client(&config)?;
            let fetcher = HttpFetcher::new(&config.pipeline.download);
            let report = backfill(&config.pipeline, &store, &fetcher, &tasks).await?;
            print_json(&report)?;
            if !report.all_succeeded() {
                let failed: Vec<&str> = report.failed().map(|t| t.key.as_str()).collect();
                tracing::error!(command = "backfill", ?failed, "Backfill finished with failures");
                anyhow::bail!("{} of {} task(s) failed: {}", failed.len(), report.tasks.len(), failed.join(", "));
            }
            Ok(())
        }
        Commands::Monthly { config, period } => {
            let config = load_config(config)?;
            let task = period.task(&config)?;
            let settings = warehouse_settings(&config)?;
            tracing::info!(command = "monthly", task = %task, "Starting monthly pipeline");
            let store = gcs_client(&config)?;
            let fetcher = HttpFetcher::new(&config.pipeline.download);
            let executor = bigquery_client(&config, &settings)?;
            let report = monthly(&config.pipeline, &store, &fetcher, &executor, &task)
                .await
                .with_context(|| format!("Monthly pipeline for {} failed", task.remote_key()))?;
            print_json(&report)
        }
        Commands::Tables { config, period } => {
            let config = load_config(config)?;
            let task = period.task(&config)?;
            let settings = warehouse_settings(&config)?;
            tracing::info!(command = "tables", task = %task, "Starting table pipeline");
            let executor = bigquery_client(&config, &settings)?;
            let report = TablePipeline::new(&executor, settings, config.pipeline.bucket.clone())
                .run(&task)
                .await?;
            print_json(&report)
        }
        Commands::EnsureBucket { config } => {
            let config = load_config(config)?;
            let store = gcs_client(&config)?;
            let state = ensure_bucket(&store, &config.pipeline.bucket).await?;
            tracing::info!(command = "ensure-bucket", ?state, "Bucket ready");
            print_json(&state)
        }
        Commands::RenderSql { config, period } => {
            let config = load_config(config)?;
            let task = period.task(&config)?;
            let settings = warehouse_settings(&config)?;
            let statements = TableStatements::render(&settings, &config.pipeline.bucket, &task)?;
            for (step, sql) in &statements.steps {
                println!("-- {step}\n{sql}\n");
            }
            Ok(())
        }
    }
}
