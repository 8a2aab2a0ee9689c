//! # contract: collaborator interfaces for the upload and table pipelines
//!
//! The core never talks to GCS, BigQuery or the download mirrors directly. It drives them
//! through the three traits below, which the CLI crate implements against the real
//! services and the tests replace with `mockall` mocks.
//!
//! - [`ObjectStore`]: bucket listing/creation, object existence and file upload.
//! - [`Fetcher`]: fetches the source file for a [`TransferTask`] into the staging directory.
//! - [`QueryExecutor`]: runs one SQL statement to completion.
//! - [`TableSink`]: relational table that CSV rows are loaded into (see [`crate::ingest`]).
//!
//! ## Mocking & Testing
//! All traits are annotated with `automock`. The mocks are exported under the
//! `test-export-mocks` feature (on by default) so the CLI crate's tests can use them too.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::error::{FetchError, IngestError, StoreError, WarehouseError};
use crate::ingest::IngestColumn;
use crate::task::TransferTask;

/// Remote object store holding the raw trip files.
///
/// Implementations must not cache: every `object_exists` call is a fresh query,
/// because the coordinator uses it as the authority on whether an upload landed.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Names of all buckets visible to the configured project.
    async fn list_buckets(&self) -> Result<Vec<String>, StoreError>;

    /// Create a bucket. A name owned elsewhere is reported as [`StoreError::NameTaken`].
    async fn create_bucket(&self, name: &str) -> Result<(), StoreError>;

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// Upload the file at `local_path` to `bucket/key`. An `Ok` here is not proof of
    /// presence; callers re-check with `object_exists`.
    async fn upload(&self, bucket: &str, key: &str, local_path: &Path) -> Result<(), StoreError>;
}

/// Download source for trip files.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the file for `task` and write it to `dest`, returning the written path.
    async fn fetch(&self, task: &TransferTask, dest: &Path) -> Result<PathBuf, FetchError>;
}

/// Warehouse SQL executor. One statement per call; returns once the job has finished.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<(), WarehouseError>;
}

/// Relational table target for [`crate::ingest`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Drop `table` if it exists and create it empty with `columns`.
    async fn replace_table(&self, table: &str, columns: &[IngestColumn]) -> Result<(), IngestError>;

    /// Append `rows` to `table`. Each row holds one value per column, `None` for an empty
    /// field. Returns the number of rows written.
    async fn append_rows(
        &self,
        table: &str,
        columns: &[IngestColumn],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64, IngestError>;
}
