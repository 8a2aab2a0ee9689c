//! High-level pipelines: the two scheduled runs, expressed as plain async functions.
//!
//! - [`backfill`]: ensure the bucket, then push a range of monthly files one after another.
//!   A failed month is recorded in the report and the run moves on to the next one.
//! - [`monthly`]: ensure the bucket, push one month's file, then build its warehouse tables.
//!   Fail-fast: tables are never built over an object that did not land.
//!
//! Both run tasks strictly in sequence. Scheduling (cron, catch-up, timezones) is left to
//! whatever invokes the CLI.

use serde::Serialize;
use tracing::{error, info};

use crate::bucket::{ensure_bucket, BucketState};
use crate::config::PipelineConfig;
use crate::contract::{Fetcher, ObjectStore, QueryExecutor};
use crate::coordinator::{UploadCoordinator, UploadOutcome};
use crate::error::{BucketError, PipelineError};
use crate::task::TransferTask;
use crate::warehouse::{TablePipeline, TableReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    AlreadyPresent,
    Uploaded { attempts: u32 },
    Failed { error: String, retryable: bool },
}

impl From<UploadOutcome> for TaskStatus {
    fn from(outcome: UploadOutcome) -> Self {
        match outcome {
            UploadOutcome::AlreadyPresent => TaskStatus::AlreadyPresent,
            UploadOutcome::Uploaded { attempts } => TaskStatus::Uploaded { attempts },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub key: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub bucket: String,
    pub bucket_created: bool,
    pub tasks: Vec<TaskReport>,
}

impl BackfillReport {
    pub fn failed(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Failed { .. }))
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub key: String,
    pub upload: UploadOutcome,
    pub tables: TableReport,
}

/// Push every task in `tasks` in order. Only a bucket failure aborts the run.
pub async fn backfill<S, F>(
    config: &PipelineConfig,
    store: &S,
    fetcher: &F,
    tasks: &[TransferTask],
) -> Result<BackfillReport, BucketError>
where
    S: ObjectStore + ?Sized,
    F: Fetcher + ?Sized,
{
    info!(tasks = tasks.len(), bucket = %config.bucket, "[SYNC] Starting backfill");
    let bucket_state = ensure_bucket(store, &config.bucket).await?;

    let coordinator = UploadCoordinator::new(config, store, fetcher);
    let mut reports = Vec::with_capacity(tasks.len());

    for task in tasks {
        let key = task.remote_key();
        let status = match coordinator
            .ensure_uploaded(task, config.retry.max_retries)
            .await
        {
            Ok(outcome) => {
                info!(key = %key, ?outcome, "[SYNC] Task done");
                TaskStatus::from(outcome)
            }
            Err(e) => {
                error!(key = %key, error = %e, "[SYNC][ERROR] Task failed, continuing");
                TaskStatus::Failed {
                    retryable: e.is_retryable(),
                    error: e.to_string(),
                }
            }
        };
        reports.push(TaskReport { key, status });
    }

    let report = BackfillReport {
        bucket: config.bucket.clone(),
        bucket_created: bucket_state == BucketState::Created,
        tasks: reports,
    };
    info!(
        total = report.tasks.len(),
        failed = report.failed().count(),
        "[SYNC] Backfill finished"
    );
    Ok(report)
}

/// Push one month's file and build its tables.
pub async fn monthly<S, F, Q>(
    config: &PipelineConfig,
    store: &S,
    fetcher: &F,
    executor: &Q,
    task: &TransferTask,
) -> Result<MonthlyReport, PipelineError>
where
    S: ObjectStore + ?Sized,
    F: Fetcher + ?Sized,
    Q: QueryExecutor + ?Sized,
{
    let warehouse = config
        .warehouse
        .clone()
        .ok_or(PipelineError::MissingWarehouse)?;
    let key = task.remote_key();
    info!(key = %key, "[SYNC] Starting monthly pipeline");

    ensure_bucket(store, &config.bucket).await?;

    let coordinator = UploadCoordinator::new(config, store, fetcher);
    let upload = coordinator
        .ensure_uploaded(task, config.retry.max_retries)
        .await
        .map_err(|e| {
            error!(key = %key, error = %e, "[SYNC][ERROR] Upload failed, skipping tables");
            e
        })?;

    let tables = TablePipeline::new(executor, warehouse, config.bucket.clone())
        .run(task)
        .await?;

    info!(key = %key, master = %tables.tables.master, "[SYNC] Monthly pipeline complete");
    Ok(MonthlyReport {
        key,
        upload,
        tables,
    })
}
