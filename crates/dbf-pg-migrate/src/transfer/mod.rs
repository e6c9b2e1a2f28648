//! Per-table load: DDL, record streaming, sanitization and a transactional insert.
//!
//! A table is the unit of failure. Whatever goes wrong while loading one
//! table (a read error, a rejected row, a lost connection) ends up in that
//! table's [`TableResult`] and never escapes to the caller, so the run can
//! move on to the next file.

use crate::error::{error_chain, MigrateError, Result};
use crate::events::{MigrationEvent, ProgressSink};
use crate::sanitize::ValueSanitizer;
use crate::schema::{duplicate_columns, synthesize};
use crate::source::{FieldDescriptor, RawRecord};
use crate::target::{SqlValue, TargetPool};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Outcome of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    Success,
    Failed,
    Skipped,
}

/// Result of loading one source file into one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableResult {
    /// Destination table name.
    pub table: String,

    /// Rows committed (0 unless the status is success).
    pub rows: u64,

    pub status: TableStatus,

    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableResult {
    pub fn success(table: impl Into<String>, rows: u64) -> Self {
        Self {
            table: table.into(),
            rows,
            status: TableStatus::Success,
            error: None,
        }
    }

    pub fn failed(table: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: 0,
            status: TableStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn skipped(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            rows: 0,
            status: TableStatus::Skipped,
            error: Some(reason.into()),
        }
    }
}

/// Loads source tables into the target schema.
pub struct TableLoader {
    target: Arc<dyn TargetPool>,
    sink: Arc<dyn ProgressSink>,
    schema: String,
    sanitizer: ValueSanitizer,
}

impl TableLoader {
    /// Create a loader writing into `schema`.
    pub fn new(
        target: Arc<dyn TargetPool>,
        sink: Arc<dyn ProgressSink>,
        schema: impl Into<String>,
        sanitizer: ValueSanitizer,
    ) -> Self {
        Self {
            target,
            sink,
            schema: schema.into(),
            sanitizer,
        }
    }

    /// Load one table. Never fails: errors are reported in the result.
    ///
    /// The table is created (if absent) and committed first. All records are
    /// then read and sanitized in memory and inserted inside one transaction,
    /// so a failed table keeps its DDL but none of its rows.
    pub async fn load<I>(&self, table: &str, fields: &[FieldDescriptor], records: I) -> TableResult
    where
        I: Iterator<Item = Result<RawRecord>> + Send,
    {
        if fields.is_empty() {
            let result = TableResult::skipped(table, "source has no fields");
            self.sink.emit(
                MigrationEvent::warn(format!("Table {} skipped: source has no fields", table))
                    .with_table(table),
            );
            return result;
        }

        self.sink
            .emit(MigrationEvent::info(format!("Migrating table {}", table)).with_table(table));

        let start = Instant::now();
        match self.load_inner(table, fields, records).await {
            Ok(rows) => {
                debug!(
                    "{}: {} rows in {:.2}s",
                    table,
                    rows,
                    start.elapsed().as_secs_f64()
                );
                self.sink.emit(
                    MigrationEvent::info(format!("Table {} migrated ({} rows)", table, rows))
                        .with_table(table)
                        .with_rows(rows),
                );
                TableResult::success(table, rows)
            }
            Err(e) => {
                let detail = error_chain(&e);
                self.sink.emit(
                    MigrationEvent::error(format!("Error migrating table {}: {}", table, detail))
                        .with_table(table),
                );
                TableResult::failed(table, detail)
            }
        }
    }

    async fn load_inner<I>(&self, table: &str, fields: &[FieldDescriptor], records: I) -> Result<u64>
    where
        I: Iterator<Item = Result<RawRecord>> + Send,
    {
        let columns = synthesize(fields);
        let duplicates = duplicate_columns(&columns);
        if !duplicates.is_empty() {
            return Err(MigrateError::table(
                table,
                format!("duplicate column names: {}", duplicates.join(", ")),
            ));
        }

        self.target
            .create_table(&self.schema, table, &columns)
            .await?;

        let mut rows: Vec<Vec<SqlValue>> = Vec::new();
        for record in records {
            let record = record?;
            rows.push(self.sanitizer.sanitize_record(&record, fields));
        }
        debug!("{}: read {} records", table, rows.len());

        self.target
            .insert_rows(&self.schema, table, &columns, &rows)
            .await
    }
}
