use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use taxi_lake_core::config::{DownloadSettings, IngestSettings, PipelineConfig, RetryPolicy, UrlLayout};
use taxi_lake_core::contract::{MockFetcher, MockTableSink};
use taxi_lake_core::error::{ConfigError, FetchError, IngestError};
use taxi_lake_core::ingest::{
    ingest, ingest_csv, insert_sql, replace_table_sql, rows_per_statement, IngestColumn, PgType,
};
use taxi_lake_core::task::{DatasetKind, FileFormat, Period, TransferTask};
use tempfile::tempdir;

const YELLOW_CSV: &str = "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,store_and_fwd_flag,fare_amount\n\
1,2021-01-01 00:30:10,2021-01-01 00:36:12,1,2.10,N,8\n\
1,2021-01-01 00:51:20,2021-01-01 00:52:19,1,.20,N,3\n\
2,2021-01-01 00:43:30,2021-01-01 01:11:06,,14.70,N,42\n\
2,2021-01-01 00:15:48,2021-01-01 00:31:01,0,10.60,N,29\n\
1,2021-01-01 00:31:49,2021-01-01 00:48:21,1,4.94,N,16.5\n";

fn settings(chunk_size: usize) -> IngestSettings {
    IngestSettings {
        table: "yellow_taxi_data".to_string(),
        chunk_size,
    }
}

fn config_for(staging_dir: &Path) -> PipelineConfig {
    PipelineConfig {
        project_id: "demo-project".to_string(),
        bucket: "trip-data-bucket".to_string(),
        staging_dir: staging_dir.to_path_buf(),
        download: DownloadSettings {
            base_url: "https://example.invalid/trip-data".to_string(),
            layout: UrlLayout::PerKind,
            format: FileFormat::CsvGz,
        },
        retry: RetryPolicy::default(),
        warehouse: None,
    }
}

fn yellow_jan() -> TransferTask {
    TransferTask::for_period(
        DatasetKind::Yellow,
        Period::new(2021, 1).unwrap(),
        FileFormat::CsvGz,
    )
}

fn write_gz(path: &Path, body: &str) {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    std::fs::write(path, encoder.finish().unwrap()).unwrap();
}

/// Sink that records every call as a line of text.
fn recording_sink(calls: Arc<Mutex<Vec<String>>>) -> MockTableSink {
    let mut sink = MockTableSink::new();
    let log = calls.clone();
    sink.expect_replace_table().returning(move |table, columns| {
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        log.lock().unwrap().push(format!("replace {table} {}", names.join(",")));
        Ok(())
    });
    sink.expect_append_rows().returning(move |table, _, rows| {
        calls.lock().unwrap().push(format!("append {table} {}", rows.len()));
        Ok(rows.len() as u64)
    });
    sink
}

#[test]
fn column_types_follow_trip_dictionary() {
    assert_eq!(PgType::for_column("VendorID"), PgType::BigInt);
    assert_eq!(PgType::for_column("PULocationID"), PgType::BigInt);
    assert_eq!(PgType::for_column("fare_amount"), PgType::Double);
    assert_eq!(PgType::for_column("lpep_pickup_datetime"), PgType::Timestamp);
    assert_eq!(PgType::for_column("store_and_fwd_flag"), PgType::Text);
    assert_eq!(PgType::for_column("Borough"), PgType::Text);
}

#[test]
fn replace_and_insert_statements() {
    let columns = vec![
        IngestColumn::from_header("\u{feff}VendorID"),
        IngestColumn::from_header("tpep_pickup_datetime"),
        IngestColumn::from_header("store_and_fwd_flag"),
    ];
    assert_eq!(columns[0].name, "VendorID");

    let [drop, create] = replace_table_sql("yellow_taxi_data", &columns);
    assert_eq!(drop, "DROP TABLE IF EXISTS \"yellow_taxi_data\"");
    assert!(create.starts_with("CREATE TABLE \"yellow_taxi_data\" ("));
    assert!(create.contains("\"VendorID\" BIGINT"));
    assert!(create.contains("\"tpep_pickup_datetime\" TIMESTAMP"));

    let insert = insert_sql("yellow_taxi_data", &columns, 2);
    assert_eq!(
        insert,
        "INSERT INTO \"yellow_taxi_data\" (\"VendorID\", \"tpep_pickup_datetime\", \"store_and_fwd_flag\") VALUES \
         ($1::TEXT::NUMERIC::BIGINT, $2::TEXT::TIMESTAMP, $3::TEXT), \
         ($4::TEXT::NUMERIC::BIGINT, $5::TEXT::TIMESTAMP, $6::TEXT)"
    );
}

#[test]
fn statement_batches_stay_under_bind_limit() {
    assert_eq!(rows_per_statement(18), 3640);
    assert!(rows_per_statement(18) * 18 <= 65_535);
    assert_eq!(rows_per_statement(0), 65_535);
}

#[tokio::test]
async fn first_chunk_replaces_then_rest_append() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("yellow_tripdata_2021-01.csv.gz");
    write_gz(&path, YELLOW_CSV);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = recording_sink(calls.clone());

    let report = ingest_csv(&sink, &path, &settings(2)).await.unwrap();

    assert_eq!(report.rows, 5);
    assert_eq!(report.chunks, 3);
    assert_eq!(report.columns, 7);
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "replace yellow_taxi_data VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,store_and_fwd_flag,fare_amount",
            "append yellow_taxi_data 2",
            "append yellow_taxi_data 2",
            "append yellow_taxi_data 1",
        ]
    );
}

#[tokio::test]
async fn empty_fields_become_nulls() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trips.csv");
    std::fs::write(&path, YELLOW_CSV).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();

    let mut sink = MockTableSink::new();
    sink.expect_replace_table().times(1).returning(|_, _| Ok(()));
    sink.expect_append_rows().times(1).returning(move |_, _, rows| {
        record.lock().unwrap().extend_from_slice(rows);
        Ok(rows.len() as u64)
    });

    ingest_csv(&sink, &path, &settings(100)).await.unwrap();

    let rows = seen.lock().unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[2][3], None);
    assert_eq!(rows[2][4].as_deref(), Some("14.70"));
}

#[tokio::test]
async fn header_only_file_still_replaces_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.csv");
    std::fs::write(&path, "LocationID,Borough,Zone,service_zone\n").unwrap();
    let mut sink = MockTableSink::new();
    sink.expect_replace_table().times(1).returning(|_, _| Ok(()));
    sink.expect_append_rows().never();

    let report = ingest_csv(&sink, &path, &settings(10)).await.unwrap();
    assert_eq!((report.rows, report.chunks), (0, 0));
}

#[tokio::test]
async fn ragged_rows_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.csv");
    std::fs::write(&path, "a,b\n1,2\n3\n").unwrap();
    let mut sink = MockTableSink::new();
    sink.expect_replace_table().returning(|_, _| Ok(()));
    sink.expect_append_rows().never();

    let err = ingest_csv(&sink, &path, &settings(10)).await.unwrap_err();
    assert!(matches!(err, IngestError::Csv { .. }), "{err:?}");
}

#[tokio::test]
async fn sink_failure_stops_the_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trips.csv");
    std::fs::write(&path, YELLOW_CSV).unwrap();
    let mut sink = MockTableSink::new();
    sink.expect_replace_table().returning(|_, _| Ok(()));
    sink.expect_append_rows()
        .times(1)
        .returning(|_, _, _| Err(IngestError::Sink("connection reset".into())));

    let err = ingest_csv(&sink, &path, &settings(2)).await.unwrap_err();
    assert!(matches!(err, IngestError::Sink(_)));
}

#[tokio::test]
async fn invalid_table_name_touches_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trips.csv");
    std::fs::write(&path, YELLOW_CSV).unwrap();
    let mut sink = MockTableSink::new();
    sink.expect_replace_table().never();

    let bad = IngestSettings {
        table: "trips; DROP TABLE users".to_string(),
        chunk_size: 10,
    };
    let err = ingest_csv(&sink, &path, &bad).await.unwrap_err();
    assert!(matches!(err, IngestError::Config(ConfigError::InvalidTableName(_))));
}

#[tokio::test]
async fn ingest_downloads_missing_file_and_keeps_it() {
    let staging = tempdir().unwrap();
    let config = config_for(staging.path());
    let task = yellow_jan();

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().times(1).returning(|_, dest| {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(YELLOW_CSV.as_bytes()).unwrap();
        std::fs::write(dest, encoder.finish().unwrap()).unwrap();
        Ok(dest.to_path_buf())
    });
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = recording_sink(calls.clone());

    let report = ingest(&config, &fetcher, &sink, &task, &settings(100_000))
        .await
        .unwrap();

    assert_eq!(report.rows, 5);
    assert_eq!(report.chunks, 1);
    assert!(task.local_path(staging.path()).exists());
}

#[tokio::test]
async fn ingest_uses_existing_local_file() {
    let staging = tempdir().unwrap();
    let config = config_for(staging.path());
    let task = yellow_jan();
    write_gz(&task.local_path(staging.path()), YELLOW_CSV);

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().never();
    let sink = recording_sink(Arc::new(Mutex::new(Vec::new())));

    let report = ingest(&config, &fetcher, &sink, &task, &settings(4)).await.unwrap();
    assert_eq!((report.rows, report.chunks), (5, 2));
}

#[tokio::test]
async fn failed_download_skips_the_table() {
    let staging = tempdir().unwrap();
    let config = config_for(staging.path());

    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().returning(|_, _| {
        Err(FetchError::Status {
            url: "https://example.invalid/trip-data/yellow/yellow_tripdata_2021-01.csv.gz".into(),
            status: 404,
        })
    });
    let mut sink = MockTableSink::new();
    sink.expect_replace_table().never();

    let err = ingest(&config, &fetcher, &sink, &yellow_jan(), &settings(10))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::DownloadFailed { .. }));
}

#[tokio::test]
async fn parquet_tasks_are_rejected() {
    let staging = tempdir().unwrap();
    let config = config_for(staging.path());
    let task = TransferTask::for_period(
        DatasetKind::Green,
        Period::new(2025, 11).unwrap(),
        FileFormat::Parquet,
    );
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch().never();
    let mut sink = MockTableSink::new();
    sink.expect_replace_table().never();

    let err = ingest(&config, &fetcher, &sink, &task, &settings(10))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::UnsupportedFormat(key) if key == "green_tripdata_2025-11.parquet"));
}
