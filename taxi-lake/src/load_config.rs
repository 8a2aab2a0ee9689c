/// `load_config` module: reads the static YAML config and injects secrets from the environment.
///
/// This is the only place untrusted YAML is parsed. The YAML-side structs below are mapped
/// onto the core [`PipelineConfig`], which is validated before it is handed to any pipeline.
///
/// # Accepted YAML
///
/// ```yaml
/// storage:
///   project_id: my-project
///   bucket: my-project-nyc-taxi
/// download:
///   base_url: https://d37ci6vzurychx.cloudfront.net/trip-data
///   layout: flat            # or per_kind
///   staging_dir: ./staging
///   format: csv_gz          # or parquet
/// warehouse:                # optional, needed by `monthly` and `tables`
///   project_id: my-project
///   dataset: trips_all
/// retry:                    # optional
///   max_retries: 3
///   delay_secs: 5
/// postgres:                 # optional, used by `ingest`
///   table: yellow_taxi_data
///   chunk_size: 100000
/// ```
///
/// # Secrets
/// The GCP access token is never read from YAML; it comes from `GOOGLE_OAUTH_ACCESS_TOKEN`.
/// The Postgres connection string likewise comes from `DATABASE_URL`.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::postgres::DATABASE_URL_ENV;
use taxi_lake_core::config::{
    DownloadSettings, IngestSettings, PipelineConfig, RetryPolicy, UrlLayout, WarehouseSettings,
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY,
};
use taxi_lake_core::task::FileFormat;
use tracing::{error, info, warn};

pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// The loaded pipeline config plus secrets taken from the environment.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub pipeline: PipelineConfig,
    pub access_token: Option<String>,
    pub ingest: IngestSettings,
    pub database_url: Option<String>,
}

impl CliConfig {
    /// The access token, or an error naming the variable to set.
    pub fn require_token(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .with_context(|| format!("{ACCESS_TOKEN_ENV} must be set for commands that reach GCP"))
    }

    /// The Postgres connection string, or an error naming the variable to set.
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .with_context(|| format!("{DATABASE_URL_ENV} must be set for `ingest`"))
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageSection {
    pub project_id: String,
    pub bucket: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadSection {
    pub base_url: String,
    #[serde(default)]
    pub layout: UrlLayout,
    pub staging_dir: PathBuf,
    #[serde(default)]
    pub format: FileFormat,
}

#[derive(Debug, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY.as_secs()
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_secs: default_delay_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    storage: StorageSection,
    download: DownloadSection,
    #[serde(default)]
    warehouse: Option<WarehouseSettings>,
    #[serde(default)]
    retry: RetrySection,
    #[serde(default)]
    postgres: IngestSettings,
}

/// Loads the YAML config at `path`, validates it and injects the access token from env.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = fs::read_to_string(path_ref).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
        anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e)
    })?;

    let raw: RawConfig = serde_yaml::from_str(&config_content).map_err(|e| {
        error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
        anyhow::anyhow!("Failed to parse config YAML: {e}")
    })?;
    info!(config_path = ?path_ref, "Parsed config YAML successfully");

    if raw.retry.max_retries == 0 {
        warn!("retry.max_retries is 0, using a single attempt");
    }

    let pipeline = PipelineConfig {
        project_id: raw.storage.project_id,
        bucket: raw.storage.bucket,
        staging_dir: raw.download.staging_dir,
        download: DownloadSettings {
            base_url: raw.download.base_url,
            layout: raw.download.layout,
            format: raw.download.format,
        },
        retry: RetryPolicy::new(
            raw.retry.max_retries,
            Duration::from_secs(raw.retry.delay_secs),
        ),
        warehouse: raw.warehouse,
    };
    pipeline
        .validate()
        .with_context(|| format!("Invalid config in {}", path_ref.display()))?;
    pipeline.trace_loaded();
    raw.postgres
        .validate()
        .with_context(|| format!("Invalid postgres section in {}", path_ref.display()))?;
    info!(table = %raw.postgres.table, chunk_size = raw.postgres.chunk_size, "Ingest target");

    let access_token = std::env::var(ACCESS_TOKEN_ENV)
        .ok()
        .filter(|t| !t.trim().is_empty());
    let database_url = std::env::var(DATABASE_URL_ENV)
        .ok()
        .filter(|u| !u.trim().is_empty());
    info!(
        token_set = access_token.is_some(),
        database_url_set = database_url.is_some(),
        "Environment secrets resolved"
    );

    Ok(CliConfig {
        pipeline,
        access_token,
        ingest: raw.postgres,
        database_url,
    })
}
