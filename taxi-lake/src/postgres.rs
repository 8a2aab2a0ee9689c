//! Postgres table sink for the `ingest` command.
//!
//! Each call runs in its own transaction, so a failed chunk leaves the rows of earlier chunks
//! in place and nothing of the failed one.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use taxi_lake_core::contract::TableSink;
use taxi_lake_core::error::IngestError;
use taxi_lake_core::ingest::{insert_sql, replace_table_sql, rows_per_statement, IngestColumn};

pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
const MAX_CONNECTIONS: u32 = 5;

pub struct PgTableSink {
    pool: PgPool,
}

fn sink_err(context: &str, e: sqlx::Error) -> IngestError {
    IngestError::Sink(format!("{context}: {e}"))
}

impl PgTableSink {
    pub async fn connect(url: &str) -> Result<Self, IngestError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(url)
            .await
            .map_err(|e| sink_err("failed to connect to postgres", e))?;
        tracing::info!("Initialized PgTableSink");
        Ok(Self { pool })
    }
}

#[async_trait]
impl TableSink for PgTableSink {
    async fn replace_table(&self, table: &str, columns: &[IngestColumn]) -> Result<(), IngestError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| sink_err("begin", e))?;
        for statement in replace_table_sql(table, columns) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| sink_err(&format!("replace {table}"), e))?;
        }
        tx.commit().await.map_err(|e| sink_err("commit", e))?;
        tracing::debug!(table, columns = columns.len(), "Table recreated");
        Ok(())
    }

    async fn append_rows(
        &self,
        table: &str,
        columns: &[IngestColumn],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64, IngestError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| sink_err("begin", e))?;
        let mut written = 0;
        for batch in rows.chunks(rows_per_statement(columns.len())) {
            let sql = insert_sql(table, columns, batch.len());
            let mut query = sqlx::query(&sql);
            for row in batch {
                for value in row {
                    query = query.bind(value.as_deref());
                }
            }
            written += query
                .execute(&mut *tx)
                .await
                .map_err(|e| sink_err(&format!("insert into {table}"), e))?
                .rows_affected();
        }
        tx.commit().await.map_err(|e| sink_err("commit", e))?;
        Ok(written)
    }
}
