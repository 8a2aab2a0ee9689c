//! BigQuery table pipeline for one uploaded trip file.
//!
//! Four statements, always in this order:
//!
//! 1. `CREATE TABLE IF NOT EXISTS` for the per-kind master table, partitioned by pickup date.
//! 2. `CREATE OR REPLACE EXTERNAL TABLE` over the uploaded object.
//! 3. `CREATE OR REPLACE TABLE` staging table adding `unique_row_id` (MD5 over the trip key
//!    columns) and `filename`.
//! 4. `MERGE` staging into master, inserting only rows whose `unique_row_id` is not already there.
//!
//! Re-running the pipeline for the same file inserts nothing new. The object must already be
//! at its canonical key before this runs.

use serde::Serialize;
use tracing::{error, info};

use crate::config::WarehouseSettings;
use crate::contract::QueryExecutor;
use crate::error::WarehouseError;
use crate::schema::{Column, TripSchema, LINEAGE_COLUMNS};
use crate::task::{FileFormat, TransferTask};

pub const STEP_MASTER: &str = "create_master";
pub const STEP_EXTERNAL: &str = "create_external";
pub const STEP_STAGING: &str = "create_staging";
pub const STEP_MERGE: &str = "merge";

/// Fully qualified table names for one (kind, period).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableNames {
    pub master: String,
    pub staging: String,
    pub external: String,
}

/// The rendered statements for one task, in execution order.
#[derive(Debug, Clone)]
pub struct TableStatements {
    pub tables: TableNames,
    pub steps: Vec<(&'static str, String)>,
}

impl TableStatements {
    pub fn render(
        settings: &WarehouseSettings,
        bucket: &str,
        task: &TransferTask,
    ) -> Result<Self, WarehouseError> {
        let (kind, period, format) = match task {
            TransferTask::Period {
                kind,
                period,
                format,
            } => (*kind, *period, *format),
            TransferTask::Named { file_name } => {
                return Err(WarehouseError::NotAPeriodTask(file_name.clone()))
            }
        };
        let schema = TripSchema::for_kind(kind)
            .ok_or_else(|| WarehouseError::UnsupportedKind(kind.to_string()))?;

        let dataset_id = format!("{}.{}", settings.project_id, settings.dataset);
        let master = format!("{dataset_id}.{kind}_tripdata");
        let staging = format!("{dataset_id}.{kind}_tripdata_{period}");
        let external = format!("{staging}_ext");
        let file_name = task.remote_key();
        let uri = format!("gs://{bucket}/{file_name}");

        let master_columns: Vec<Column> = LINEAGE_COLUMNS
            .iter()
            .chain(schema.columns.iter())
            .copied()
            .collect();

        let steps = vec![
            (
                STEP_MASTER,
                format!(
                    "CREATE TABLE IF NOT EXISTS `{master}`\n(\n{}\n)\nPARTITION BY DATE({});",
                    column_definitions(&master_columns),
                    schema.pickup_column
                ),
            ),
            (STEP_EXTERNAL, external_table_sql(&external, &uri, schema, format)),
            (
                STEP_STAGING,
                format!(
                    "CREATE OR REPLACE TABLE `{staging}`\nAS\nSELECT\n    MD5(CONCAT(\n{}\n    )) AS unique_row_id,\n    '{}' AS filename,\n    *\nFROM `{external}`;",
                    schema
                        .key_columns()
                        .iter()
                        .map(|c| format!("        COALESCE(CAST({c} AS STRING), '')"))
                        .collect::<Vec<_>>()
                        .join(",\n"),
                    escape_literal(&file_name)
                ),
            ),
            (STEP_MERGE, merge_sql(&master, &staging, &master_columns, format)),
        ];

        Ok(Self {
            tables: TableNames {
                master,
                staging,
                external,
            },
            steps,
        })
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn column_definitions(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| match c.description {
            Some(d) => format!(
                "    {} {} OPTIONS (description = '{}')",
                c.name,
                c.sql_type,
                escape_literal(d)
            ),
            None => format!("    {} {}", c.name, c.sql_type),
        })
        .collect::<Vec<_>>()
        .join(",\n")
}

fn external_table_sql(external: &str, uri: &str, schema: &TripSchema, format: FileFormat) -> String {
    match format {
        FileFormat::CsvGz => format!(
            "CREATE OR REPLACE EXTERNAL TABLE `{external}`\n(\n{}\n)\nOPTIONS (\n    format = 'CSV',\n    uris = ['{uri}'],\n    skip_leading_rows = 1,\n    ignore_unknown_values = TRUE\n);",
            column_definitions(schema.columns)
        ),
        // Parquet carries its own schema.
        FileFormat::Parquet => format!(
            "CREATE OR REPLACE EXTERNAL TABLE `{external}`\nOPTIONS (\n    format = 'PARQUET',\n    uris = ['{uri}']\n);"
        ),
    }
}

fn merge_sql(master: &str, staging: &str, columns: &[Column], format: FileFormat) -> String {
    let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
    let values: Vec<String> = columns
        .iter()
        .map(|c| {
            let lineage = LINEAGE_COLUMNS.iter().any(|l| l.name == c.name);
            match format {
                // Parquet columns keep the file's physical types; coerce them to the master layout.
                FileFormat::Parquet if !lineage => format!("CAST(S.{} AS {})", c.name, c.sql_type),
                _ => format!("S.{}", c.name),
            }
        })
        .collect();
    format!(
        "MERGE INTO `{master}` T\nUSING `{staging}` S\nON T.unique_row_id = S.unique_row_id\nWHEN NOT MATCHED THEN\n    INSERT ({})\n    VALUES ({});",
        names.join(", "),
        values.join(", ")
    )
}

/// What a completed table pipeline touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub tables: TableNames,
    pub steps_run: Vec<&'static str>,
}

pub struct TablePipeline<'a, Q: ?Sized> {
    executor: &'a Q,
    settings: WarehouseSettings,
    bucket: String,
}

impl<'a, Q> TablePipeline<'a, Q>
where
    Q: QueryExecutor + ?Sized,
{
    pub fn new(executor: &'a Q, settings: WarehouseSettings, bucket: impl Into<String>) -> Self {
        Self {
            executor,
            settings,
            bucket: bucket.into(),
        }
    }

    /// Run all four statements for `task`, stopping at the first failure.
    pub async fn run(&self, task: &TransferTask) -> Result<TableReport, WarehouseError> {
        let statements = TableStatements::render(&self.settings, &self.bucket, task)?;
        let total = statements.steps.len();
        let mut steps_run = Vec::with_capacity(total);

        for (index, (step, sql)) in statements.steps.iter().enumerate() {
            info!(step = *step, "[TABLES] Step {}/{}", index + 1, total);
            if let Err(e) = self.executor.execute(sql).await {
                error!(step = *step, error = %e, "[TABLES] Statement failed");
                return Err(WarehouseError::Step {
                    step: *step,
                    source: Box::new(e),
                });
            }
            steps_run.push(*step);
        }

        info!(
            master = %statements.tables.master,
            staging = %statements.tables.staging,
            "[TABLES] Merged staging into master"
        );
        Ok(TableReport {
            tables: statements.tables,
            steps_run,
        })
    }
}
