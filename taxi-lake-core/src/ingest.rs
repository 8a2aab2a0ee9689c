//! Chunked load of a trip CSV into a relational table.
//!
//! The table is recreated from the CSV header before the first chunk, then every chunk of
//! `chunk_size` rows is appended. Re-running an ingest for the same file therefore leaves
//! exactly one copy of its rows. Plain `.csv` and gzipped `.csv.gz` files are read; Parquet
//! is rejected up front.
//!
//! Column types follow the trip dictionaries: location, vendor and code columns are
//! integers, money and distance columns are floating point, `*_datetime` columns are
//! timestamps, and anything unrecognised is text. Values are always sent as text and cast
//! by the database, so an empty field becomes `NULL` whatever the column type.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};

use crate::config::{IngestSettings, PipelineConfig};
use crate::contract::{Fetcher, TableSink};
use crate::error::IngestError;
use crate::task::TransferTask;

/// Bind-parameter limit of a single Postgres statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

const INTEGER_COLUMNS: &[&str] = &[
    "VendorID",
    "passenger_count",
    "RatecodeID",
    "PULocationID",
    "DOLocationID",
    "payment_type",
    "trip_type",
    "LocationID",
];

const FLOAT_COLUMNS: &[&str] = &[
    "trip_distance",
    "fare_amount",
    "extra",
    "mta_tax",
    "tip_amount",
    "tolls_amount",
    "ehail_fee",
    "improvement_surcharge",
    "total_amount",
    "congestion_surcharge",
    "airport_fee",
    "cbd_congestion_fee",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PgType {
    BigInt,
    Double,
    Timestamp,
    Text,
}

impl PgType {
    pub fn for_column(name: &str) -> Self {
        if INTEGER_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            PgType::BigInt
        } else if FLOAT_COLUMNS.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            PgType::Double
        } else if name.ends_with("_datetime") {
            PgType::Timestamp
        } else {
            PgType::Text
        }
    }

    pub fn ddl(self) -> &'static str {
        match self {
            PgType::BigInt => "BIGINT",
            PgType::Double => "DOUBLE PRECISION",
            PgType::Timestamp => "TIMESTAMP",
            PgType::Text => "TEXT",
        }
    }

    /// Placeholder for bind parameter `n`, cast from text to the column type.
    /// Integer columns go through `NUMERIC` so values like `1.0` still load.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            PgType::BigInt => format!("${n}::TEXT::NUMERIC::BIGINT"),
            PgType::Double => format!("${n}::TEXT::DOUBLE PRECISION"),
            PgType::Timestamp => format!("${n}::TEXT::TIMESTAMP"),
            PgType::Text => format!("${n}::TEXT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestColumn {
    pub name: String,
    pub pg_type: PgType,
}

impl IngestColumn {
    pub fn from_header(name: &str) -> Self {
        let name = name.trim().trim_start_matches('\u{feff}').to_string();
        let pg_type = PgType::for_column(&name);
        Self { name, pg_type }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `DROP` and `CREATE` statements that reset `table` to `columns`.
pub fn replace_table_sql(table: &str, columns: &[IngestColumn]) -> [String; 2] {
    let definitions: Vec<String> = columns
        .iter()
        .map(|c| format!("    {} {}", quote_ident(&c.name), c.pg_type.ddl()))
        .collect();
    [
        format!("DROP TABLE IF EXISTS {}", quote_ident(table)),
        format!(
            "CREATE TABLE {} (\n{}\n)",
            quote_ident(table),
            definitions.join(",\n")
        ),
    ]
}

/// Multi-row `INSERT` for `rows` rows, numbering parameters row by row.
pub fn insert_sql(table: &str, columns: &[IngestColumn], rows: usize) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let tuples: Vec<String> = (0..rows)
        .map(|row| {
            let values: Vec<String> = columns
                .iter()
                .enumerate()
                .map(|(i, c)| c.pg_type.placeholder(row * columns.len() + i + 1))
                .collect();
            format!("({})", values.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        names.join(", "),
        tuples.join(", ")
    )
}

/// Rows that fit in one statement without exceeding [`MAX_BIND_PARAMS`].
pub fn rows_per_statement(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub table: String,
    pub columns: usize,
    pub rows: u64,
    pub chunks: u32,
}

type Records = csv::Reader<Box<dyn Read + Send>>;

fn open_records(path: &Path) -> Result<Records, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    let gzipped = path.extension().is_some_and(|ext| ext == "gz");
    let input: Box<dyn Read + Send> = if gzipped {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(csv::ReaderBuilder::new().has_headers(true).from_reader(input))
}

fn csv_error(path: &Path, e: csv::Error) -> IngestError {
    IngestError::Csv {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn next_chunk(
    records: &mut Records,
    path: &Path,
    chunk_size: usize,
) -> Result<Vec<Vec<Option<String>>>, IngestError> {
    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    while rows.len() < chunk_size {
        if !records
            .read_record(&mut record)
            .map_err(|e| csv_error(path, e))?
        {
            break;
        }
        rows.push(
            record
                .iter()
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect(),
        );
    }
    Ok(rows)
}

/// Load the CSV at `path` into `settings.table`, replacing whatever the table held.
pub async fn ingest_csv<K>(
    sink: &K,
    path: &Path,
    settings: &IngestSettings,
) -> Result<IngestReport, IngestError>
where
    K: TableSink + ?Sized,
{
    settings.validate()?;
    let mut records = open_records(path)?;
    let header = records.headers().map_err(|e| csv_error(path, e))?.clone();
    let columns: Vec<IngestColumn> = header.iter().map(IngestColumn::from_header).collect();
    if columns.iter().all(|c| c.name.is_empty()) {
        return Err(IngestError::EmptyHeader(path.to_path_buf()));
    }

    sink.replace_table(&settings.table, &columns).await?;
    info!(table = %settings.table, columns = columns.len(), "[INGEST] Table replaced");

    let mut report = IngestReport {
        table: settings.table.clone(),
        columns: columns.len(),
        rows: 0,
        chunks: 0,
    };
    loop {
        let rows = next_chunk(&mut records, path, settings.chunk_size)?;
        if rows.is_empty() {
            break;
        }
        let written = sink.append_rows(&settings.table, &columns, &rows).await?;
        report.rows += written;
        report.chunks += 1;
        info!(chunk = report.chunks, rows = report.rows, "[INGEST] Chunk appended");
    }

    info!(table = %report.table, rows = report.rows, chunks = report.chunks, "[INGEST] Ingest complete");
    Ok(report)
}

/// Only CSV files, plain or gzipped, can be ingested.
pub fn ensure_ingestible(task: &TransferTask) -> Result<(), IngestError> {
    let key = task.remote_key();
    if key.ends_with(".parquet") {
        return Err(IngestError::UnsupportedFormat(key));
    }
    Ok(())
}

/// Make sure `task`'s file is in the staging directory, downloading it if needed, then load
/// it into `settings.table`. The local file is kept afterwards so it can still be uploaded.
pub async fn ingest<F, K>(
    config: &PipelineConfig,
    fetcher: &F,
    sink: &K,
    task: &TransferTask,
    settings: &IngestSettings,
) -> Result<IngestReport, IngestError>
where
    F: Fetcher + ?Sized,
    K: TableSink + ?Sized,
{
    let key = task.remote_key();
    let span = info_span!("ingest", key = %key, table = %settings.table);
    async move {
        settings.validate()?;
        if let Err(e) = ensure_ingestible(task) {
            error!(error = %e, "[INGEST] File cannot be ingested");
            return Err(e);
        }

        let local_path = task.local_path(&config.staging_dir);
        if !tokio::fs::try_exists(&local_path).await.unwrap_or(false) {
            info!(path = %local_path.display(), "[INGEST] File not found locally, downloading");
            fetcher
                .fetch(task, &local_path)
                .await
                .map_err(|e| IngestError::DownloadFailed {
                    key: key.clone(),
                    source: e,
                })?;
        }

        ingest_csv(sink, &local_path, settings).await
    }
    .instrument(span)
    .await
}
