//! Error types shared across the core crate.
//!
//! Collaborator traits in [`crate::contract`] return [`StoreError`], [`FetchError`] and
//! [`WarehouseError`]; the coordinator folds them into [`UploadError`] so callers can
//! branch on the failure kind instead of grepping logs.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("unknown dataset kind: {0}")]
    UnknownKind(String),

    #[error("month must be between 1 and 12, got {0}")]
    InvalidMonth(u8),

    #[error("year out of range: {0}")]
    InvalidYear(u16),

    #[error("empty month range: {from}..={to}")]
    EmptyRange { from: u8, to: u8 },

    #[error("file name is empty")]
    EmptyFileName,

    #[error("file name must not contain a path separator: {0}")]
    PathInFileName(String),
}

/// Errors reported by an object store client.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The bucket name is owned by someone else (or otherwise unavailable to us).
    #[error("bucket name already taken: {0}")]
    NameTaken(String),

    #[error("local file error for {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response ({status}): {body}")]
    Response { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("bucket name already taken by another owner: {0}")]
    NameTaken(String),

    #[error("bucket provisioning failed for {bucket}: {source}")]
    Store {
        bucket: String,
        #[source]
        source: StoreError,
    },
}

/// Errors reported by a download source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the warehouse table pipeline.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("no table schema for dataset kind {0}")]
    UnsupportedKind(String),

    #[error("table pipeline needs a (kind, period) task, got {0}")]
    NotAPeriodTask(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("step {step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<WarehouseError>,
    },
}

/// Tagged failure of [`crate::coordinator::UploadCoordinator::ensure_uploaded`].
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("transfer task resolved to an empty key")]
    InvalidTask,

    #[error("download of {key} failed: {source}")]
    DownloadFailed {
        key: String,
        #[source]
        source: FetchError,
    },

    #[error("bucket unavailable: {source}")]
    BucketUnavailable {
        #[source]
        source: BucketError,
    },

    #[error("upload of {key} not verified after {attempts} attempt(s)")]
    UploadExhausted { key: String, attempts: u32 },
}

impl UploadError {
    /// Whether re-running the same task later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::UploadExhausted { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("invalid table name: {0}")]
    InvalidTableName(String),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid base url {url}: {message}")]
    InvalidBaseUrl { url: String, message: String },
}

/// Errors from loading a CSV trip file into a relational table.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot ingest {0}: only CSV and gzipped CSV files are supported")]
    UnsupportedFormat(String),

    #[error("download of {key} failed: {source}")]
    DownloadFailed {
        key: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}: {message}")]
    Csv { path: PathBuf, message: String },

    #[error("{0} has no header row")]
    EmptyHeader(PathBuf),

    #[error("table sink failed: {0}")]
    Sink(String),
}

/// Failure of a whole pipeline run (see [`crate::synchronise`]).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("bucket step failed: {0}")]
    Bucket(#[from] BucketError),

    #[error("upload step failed: {0}")]
    Upload(#[from] UploadError),

    #[error("table step failed: {0}")]
    Tables(#[from] WarehouseError),

    #[error("no warehouse settings configured")]
    MissingWarehouse,
}
