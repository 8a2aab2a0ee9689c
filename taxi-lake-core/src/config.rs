use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::task::FileFormat;

/// GCS bucket naming rule (single-label form; dotted names are not used here).
static BUCKET_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_-]{1,61}[a-z0-9]$").expect("bucket name pattern is valid")
});

/// Unquoted SQL identifier, within the Postgres 63-byte limit.
static TABLE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("table name pattern is valid")
});

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Everything the coordinator and pipelines need, passed in explicitly at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub project_id: String,
    pub bucket: String,
    pub staging_dir: PathBuf,
    pub download: DownloadSettings,
    pub retry: RetryPolicy,
    pub warehouse: Option<WarehouseSettings>,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Missing("storage.project_id"));
        }
        validate_bucket_name(&self.bucket)?;
        if !self.download.base_url.starts_with("http://")
            && !self.download.base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.download.base_url.clone(),
                message: "expected an http(s) url".to_string(),
            });
        }
        Ok(())
    }

    pub fn trace_loaded(&self) {
        info!(
            project_id = %self.project_id,
            bucket = %self.bucket,
            staging_dir = %self.staging_dir.display(),
            max_retries = self.retry.max_retries,
            warehouse = self.warehouse.is_some(),
            "Loaded PipelineConfig"
        );
        debug!(?self, "PipelineConfig loaded (full debug)");
    }
}

/// How URLs under the download mirror are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlLayout {
    /// `{base_url}/{file_name}`, as on the TLC CloudFront mirror.
    #[default]
    Flat,
    /// `{base_url}/{kind}/{file_name}`, as on the GitHub releases mirror.
    PerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    pub base_url: String,
    #[serde(default)]
    pub layout: UrlLayout,
    #[serde(default)]
    pub format: FileFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseSettings {
    pub project_id: String,
    pub dataset: String,
}

pub const DEFAULT_INGEST_TABLE: &str = "yellow_taxi_data";
pub const DEFAULT_INGEST_CHUNK_SIZE: usize = 100_000;

/// Target of a relational ingest: the table a CSV is loaded into, and how many rows go per chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSettings {
    #[serde(default = "default_ingest_table")]
    pub table: String,
    #[serde(default = "default_ingest_chunk_size")]
    pub chunk_size: usize,
}

fn default_ingest_table() -> String {
    DEFAULT_INGEST_TABLE.to_string()
}

fn default_ingest_chunk_size() -> usize {
    DEFAULT_INGEST_CHUNK_SIZE
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            table: default_ingest_table(),
            chunk_size: default_ingest_chunk_size(),
        }
    }
}

impl IngestSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !TABLE_NAME_PATTERN.is_match(&self.table) {
            return Err(ConfigError::InvalidTableName(self.table.clone()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Missing("postgres.chunk_size"));
        }
        Ok(())
    }
}

/// Fixed-delay retry bound for the upload loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

pub fn validate_bucket_name(name: &str) -> Result<(), ConfigError> {
    // "goog" prefixed names are reserved by GCS.
    if !BUCKET_NAME_PATTERN.is_match(name) || name.starts_with("goog") {
        return Err(ConfigError::InvalidBucketName(name.to_string()));
    }
    Ok(())
}
