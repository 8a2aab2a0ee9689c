//! Upload coordinator: idempotent, verified upload of one trip file.
//!
//! [`UploadCoordinator::ensure_uploaded`] runs a fixed sequence for a [`TransferTask`]:
//!
//! 1. Ask the store whether the object is already there. If so, drop any local copy and stop.
//! 2. Download the file into the staging directory if it is not there yet.
//! 3. Create the bucket if it does not exist.
//! 4. Upload, then re-query existence. Only a positive re-query counts as success; the
//!    upload call's own `Ok` is never trusted on its own. Failed attempts wait a fixed delay
//!    and try again, up to `max_retries` attempts in total.
//!
//! Download and bucket failures are permanent and returned straight away. Only the upload
//! loop retries. The local file is removed only once the object is confirmed remote, and is
//! left in place on failure so it can be inspected.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};

use crate::bucket::ensure_bucket;
use crate::config::{PipelineConfig, RetryPolicy};
use crate::contract::{Fetcher, ObjectStore};
use crate::error::UploadError;
use crate::task::TransferTask;

/// How a successful [`UploadCoordinator::ensure_uploaded`] call got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// The object was already in the bucket; nothing was downloaded or uploaded.
    AlreadyPresent,
    /// Uploaded and verified on the given attempt.
    Uploaded { attempts: u32 },
}

pub struct UploadCoordinator<'a, S: ?Sized, F: ?Sized> {
    store: &'a S,
    fetcher: &'a F,
    bucket: String,
    staging_dir: PathBuf,
    retry: RetryPolicy,
}

impl<'a, S, F> UploadCoordinator<'a, S, F>
where
    S: ObjectStore + ?Sized,
    F: Fetcher + ?Sized,
{
    pub fn new(config: &PipelineConfig, store: &'a S, fetcher: &'a F) -> Self {
        Self {
            store,
            fetcher,
            bucket: config.bucket.clone(),
            staging_dir: config.staging_dir.clone(),
            retry: config.retry,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Ensure `task`'s file is present in the bucket, uploading it if needed.
    ///
    /// `max_retries` bounds the number of upload attempts; 0 is treated as 1.
    pub async fn ensure_uploaded(
        &self,
        task: &TransferTask,
        max_retries: u32,
    ) -> Result<UploadOutcome, UploadError> {
        let key = task.remote_key();
        let span = info_span!("ensure_uploaded", key = %key, bucket = %self.bucket);
        self.run(task, key, max_retries.max(1))
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        task: &TransferTask,
        key: String,
        max_retries: u32,
    ) -> Result<UploadOutcome, UploadError> {
        if key.trim().is_empty() {
            error!("[UPLOAD] Refusing task with an empty key");
            return Err(UploadError::InvalidTask);
        }
        let local_path = task.local_path(&self.staging_dir);

        // 1. Already uploaded?
        match self.store.object_exists(&self.bucket, &key).await {
            Ok(true) => {
                info!("[UPLOAD] Object already exists in bucket, skipping");
                remove_local(&local_path).await;
                return Ok(UploadOutcome::AlreadyPresent);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "[UPLOAD] Existence pre-check failed, assuming absent");
            }
        }

        // 2. Local file, downloading if needed.
        let source_path = if file_exists(&local_path).await {
            local_path
        } else {
            info!(path = %local_path.display(), "[UPLOAD] File not found locally, downloading");
            match self.fetcher.fetch(task, &local_path).await {
                Ok(path) => path,
                Err(e) => {
                    error!(error = %e, "[UPLOAD] Download failed, aborting");
                    return Err(UploadError::DownloadFailed { key, source: e });
                }
            }
        };

        // 3. Bucket.
        if let Err(e) = ensure_bucket(self.store, &self.bucket).await {
            error!(error = %e, "[UPLOAD] Bucket unavailable, aborting");
            return Err(UploadError::BucketUnavailable { source: e });
        }

        // 4. Upload and verify.
        for attempt in 1..=max_retries {
            info!(attempt, max_retries, "[UPLOAD] Uploading");
            match self.store.upload(&self.bucket, &key, &source_path).await {
                Ok(()) => match self.store.object_exists(&self.bucket, &key).await {
                    Ok(true) => {
                        info!(attempt, "[UPLOAD] Uploaded and verified");
                        remove_local(&source_path).await;
                        return Ok(UploadOutcome::Uploaded { attempts: attempt });
                    }
                    Ok(false) => {
                        warn!(attempt, "[UPLOAD] Verification failed, object not found after upload");
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "[UPLOAD] Verification query failed");
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "[UPLOAD] Upload error");
                }
            }

            if attempt < max_retries {
                info!(delay_secs = self.retry.delay.as_secs_f64(), "[UPLOAD] Retrying after delay");
                tokio::time::sleep(self.retry.delay).await;
            }
        }

        error!(
            attempts = max_retries,
            path = %source_path.display(),
            "[UPLOAD] Giving up, local file kept for inspection"
        );
        Err(UploadError::UploadExhausted {
            key,
            attempts: max_retries,
        })
    }
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn remove_local(path: &Path) {
    if !file_exists(path).await {
        return;
    }
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "[UPLOAD] Removed local file"),
        Err(e) => warn!(path = %path.display(), error = %e, "[UPLOAD] Failed to remove local file"),
    }
}
