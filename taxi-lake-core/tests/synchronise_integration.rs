use std::path::Path;
use std::time::Duration;

use taxi_lake_core::config::{
    DownloadSettings, PipelineConfig, RetryPolicy, UrlLayout, WarehouseSettings,
};
use taxi_lake_core::contract::{MockFetcher, MockObjectStore, MockQueryExecutor};
use taxi_lake_core::coordinator::UploadOutcome;
use taxi_lake_core::error::{FetchError, PipelineError, UploadError};
use taxi_lake_core::synchronise::{backfill, monthly, TaskStatus};
use taxi_lake_core::task::{DatasetKind, FileFormat, Period, TransferTask};
use tempfile::tempdir;

const BUCKET: &str = "trip-data-bucket";

fn config_for(staging_dir: &Path, warehouse: Option<WarehouseSettings>) -> PipelineConfig {
    PipelineConfig {
        project_id: "demo-project".to_string(),
        bucket: BUCKET.to_string(),
        staging_dir: staging_dir.to_path_buf(),
        download: DownloadSettings {
            base_url: "https://example.invalid/trip-data".to_string(),
            layout: UrlLayout::PerKind,
            format: FileFormat::CsvGz,
        },
        retry: RetryPolicy::new(2, Duration::ZERO),
        warehouse,
    }
}

fn warehouse() -> Option<WarehouseSettings> {
    Some(WarehouseSettings {
        project_id: "demo-project".to_string(),
        dataset: "trips".to_string(),
    })
}

fn yellow_months(months: std::ops::RangeInclusive<u8>) -> Vec<TransferTask> {
    months
        .map(|m| {
            TransferTask::for_period(
                DatasetKind::Yellow,
                Period::new(2024, m).unwrap(),
                FileFormat::Parquet,
            )
        })
        .collect()
}

#[tokio::test]
async fn backfill_continues_past_failed_months() {
    let staging = tempdir().unwrap();
    let config = config_for(staging.path(), None);
    let tasks = yellow_months(1..=3);

    let mut store = MockObjectStore::new();
    store
        .expect_list_buckets()
        .returning(|| Ok(vec![BUCKET.to_string()]));
    // January is already there; February never verifies; March verifies after upload.
    let mut march_checks = 0;
    store.expect_object_exists().returning(move |_, key| match key {
        "yellow_tripdata_2024-01.parquet" => Ok(true),
        "yellow_tripdata_2024-02.parquet" => Ok(false),
        _ => {
            march_checks += 1;
            Ok(march_checks > 1)
        }
    });
    store.expect_upload().returning(|_, _, _| Ok(()));

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().returning(|_, dest| {
        std::fs::write(dest, b"PAR1").unwrap();
        Ok(dest.to_path_buf())
    });

    let report = backfill(&config, &store, &fetcher, &tasks).await.unwrap();

    assert!(!report.bucket_created);
    assert_eq!(report.tasks.len(), 3);
    assert_eq!(report.tasks[0].status, TaskStatus::AlreadyPresent);
    assert!(matches!(
        report.tasks[1].status,
        TaskStatus::Failed {
            retryable: true,
            ..
        }
    ));
    assert_eq!(report.tasks[2].status, TaskStatus::Uploaded { attempts: 1 });
    assert!(!report.all_succeeded());
    assert_eq!(
        report.failed().map(|t| t.key.as_str()).collect::<Vec<_>>(),
        vec!["yellow_tripdata_2024-02.parquet"]
    );
}

#[tokio::test]
async fn backfill_creates_missing_bucket_once_up_front() {
    let staging = tempdir().unwrap();
    let config = config_for(staging.path(), None);
    let tasks = yellow_months(1..=2);

    let mut store = MockObjectStore::new();
    let mut listings = 0;
    store.expect_list_buckets().returning(move || {
        listings += 1;
        if listings == 1 {
            Ok(vec![])
        } else {
            Ok(vec![BUCKET.to_string()])
        }
    });
    store.expect_create_bucket().times(1).returning(|_| Ok(()));
    store.expect_object_exists().returning(|_, _| Ok(true));

    let fetcher = MockFetcher::new();
    let report = backfill(&config, &store, &fetcher, &tasks).await.unwrap();

    assert!(report.bucket_created);
    assert!(report.all_succeeded());
}

#[tokio::test]
async fn monthly_uploads_then_builds_tables() {
    let staging = tempdir().unwrap();
    let config = config_for(staging.path(), warehouse());
    let task = TransferTask::for_period(
        DatasetKind::Green,
        Period::new(2024, 3).unwrap(),
        FileFormat::CsvGz,
    );

    let mut store = MockObjectStore::new();
    store
        .expect_list_buckets()
        .returning(|| Ok(vec![BUCKET.to_string()]));
    let mut checks = 0;
    store.expect_object_exists().returning(move |_, _| {
        checks += 1;
        Ok(checks > 1)
    });
    store.expect_upload().times(1).returning(|_, _, _| Ok(()));

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().times(1).returning(|_, dest| {
        std::fs::write(dest, b"VendorID\n").unwrap();
        Ok(dest.to_path_buf())
    });

    let mut executor = MockQueryExecutor::new();
    executor.expect_execute().times(4).returning(|_| Ok(()));

    let report = monthly(&config, &store, &fetcher, &executor, &task)
        .await
        .unwrap();

    assert_eq!(report.key, "green_tripdata_2024-03.csv.gz");
    assert_eq!(report.upload, UploadOutcome::Uploaded { attempts: 1 });
    assert_eq!(report.tables.steps_run.len(), 4);
}

#[tokio::test]
async fn monthly_skips_tables_when_upload_fails() {
    let staging = tempdir().unwrap();
    let config = config_for(staging.path(), warehouse());
    let task = TransferTask::for_period(
        DatasetKind::Green,
        Period::new(2024, 4).unwrap(),
        FileFormat::CsvGz,
    );

    let mut store = MockObjectStore::new();
    store
        .expect_list_buckets()
        .returning(|| Ok(vec![BUCKET.to_string()]));
    store.expect_object_exists().returning(|_, _| Ok(false));
    store.expect_upload().never();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().returning(|_, _| {
        Err(FetchError::Request {
            url: "https://example.invalid".into(),
            message: "timed out".into(),
        })
    });

    let mut executor = MockQueryExecutor::new();
    executor.expect_execute().never();

    let err = monthly(&config, &store, &fetcher, &executor, &task)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Upload(UploadError::DownloadFailed { .. })
    ));
}

#[tokio::test]
async fn monthly_requires_warehouse_settings() {
    let staging = tempdir().unwrap();
    let config = config_for(staging.path(), None);
    let task = yellow_months(1..=1).remove(0);

    let store = MockObjectStore::new();
    let fetcher = MockFetcher::new();
    let executor = MockQueryExecutor::new();

    let err = monthly(&config, &store, &fetcher, &executor, &task)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::MissingWarehouse));
}
