//! PostgreSQL target database operations.

#[cfg(test)]
pub(crate) mod memory;

use crate::config::TargetConfig;
use crate::error::{error_chain, MigrateError, Result};
use crate::schema::ColumnDef;
use crate::typemap::DestinationType;
use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use std::time::{Duration, Instant};
use tokio_postgres::{types::ToSql, NoTls};
use tracing::{debug, info, warn};

/// PostgreSQL limit on bind parameters in one statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Trait for target database operations.
#[async_trait]
pub trait TargetPool: Send + Sync {
    /// Create a schema if it doesn't exist.
    async fn create_schema(&self, schema: &str) -> Result<()>;

    /// Create a table if it doesn't exist. Committed on its own.
    async fn create_table(&self, schema: &str, table: &str, columns: &[ColumnDef]) -> Result<()>;

    /// Insert all rows in a single transaction.
    ///
    /// Either every row is committed or none is: on failure the transaction
    /// is rolled back before the error is returned.
    async fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64>;

    /// Get the row count for a table.
    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64>;

    /// Get the database type.
    fn db_type(&self) -> &str;

    /// Close all connections.
    async fn close(&self);
}

/// Destination-ready field value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    F64(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    Text(String),
}

/// PostgreSQL target pool implementation.
///
/// The pool holds a single connection: the migration worker owns it for the
/// whole run and statements are never issued concurrently.
pub struct PgPool {
    pool: Pool,
    insert_batch_rows: usize,
}

impl PgPool {
    /// Connect to PostgreSQL and verify the connection.
    pub async fn connect(config: &TargetConfig, insert_batch_rows: usize) -> Result<Self> {
        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(config.pg_config(), NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(1)
            .build()
            .map_err(|e| MigrateError::pool(e, "building PostgreSQL pool"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::Connection(error_chain(&e)))?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| MigrateError::Connection(error_chain(&e)))?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            insert_batch_rows: insert_batch_rows.max(1),
        })
    }

    /// Round-trip a trivial query and return its latency.
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "ping"))?;
        client.simple_query("SELECT 1").await?;
        Ok(start.elapsed())
    }

    /// Generate DDL for table creation.
    fn generate_ddl(schema: &str, table: &str, columns: &[ColumnDef]) -> String {
        let cols: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", Self::quote_ident(&c.name), c.data_type.as_sql()))
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            Self::qualify_table(schema, table),
            cols.join(", ")
        )
    }

    /// Quote a PostgreSQL identifier.
    fn quote_ident(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Fully qualify a table name.
    fn qualify_table(schema: &str, table: &str) -> String {
        format!("{}.{}", Self::quote_ident(schema), Self::quote_ident(table))
    }
}

#[async_trait]
impl TargetPool for PgPool {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "creating schema"))?;

        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", Self::quote_ident(schema));
        client.execute(&sql, &[]).await?;

        debug!("Created schema '{}'", schema);
        Ok(())
    }

    async fn create_table(&self, schema: &str, table: &str, columns: &[ColumnDef]) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "creating table"))?;

        let ddl = Self::generate_ddl(schema, table, columns);
        client.execute(&ddl, &[]).await?;

        debug!("Created table {}.{}", schema, table);
        Ok(())
    }

    async fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "inserting rows"))?;
        let tx = client.transaction().await?;

        let per_statement = rows_per_statement(columns.len(), self.insert_batch_rows);
        let result: Result<u64> = async {
            let mut inserted = 0u64;
            for chunk in rows.chunks(per_statement) {
                let (sql, params) = build_insert_sql(schema, table, columns, chunk);
                let refs: Vec<&(dyn ToSql + Sync)> =
                    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                inserted += tx.execute(&sql, &refs).await?;
            }
            Ok(inserted)
        }
        .await;

        match result {
            Ok(inserted) => {
                tx.commit().await?;
                debug!("Inserted {} rows into {}.{}", inserted, schema, table);
                Ok(inserted)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of {}.{} failed: {}", schema, table, rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "counting rows"))?;

        let sql = format!("SELECT COUNT(*) FROM {}", Self::qualify_table(schema, table));
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get(0))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Rows per INSERT so the statement stays under the bind-parameter limit.
fn rows_per_statement(num_columns: usize, batch_rows: usize) -> usize {
    let by_params = MAX_BIND_PARAMS / num_columns.max(1);
    batch_rows.min(by_params).max(1)
}

/// Cast applied to a text parameter so PostgreSQL converts it to the column type.
fn sql_cast_for_column(data_type: DestinationType) -> &'static str {
    match data_type {
        DestinationType::Numeric => "::text::numeric",
        DestinationType::Date => "::text::date",
        DestinationType::Boolean => "::text::boolean",
        DestinationType::Text => "::text",
    }
}

/// Build a multi-row INSERT with text parameters.
fn build_insert_sql(
    schema: &str,
    table: &str,
    columns: &[ColumnDef],
    rows: &[Vec<SqlValue>],
) -> (String, Vec<Option<String>>) {
    let col_list: String = columns
        .iter()
        .map(|c| PgPool::quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut placeholders = Vec::with_capacity(rows.len());
    let mut params = Vec::with_capacity(rows.len() * columns.len());
    let mut idx = 1;

    for row in rows {
        let row_placeholders: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(col_idx, col)| {
                let p = format!("${}{}", idx, sql_cast_for_column(col.data_type));
                idx += 1;
                params.push(row.get(col_idx).and_then(sql_value_to_param));
                p
            })
            .collect();
        placeholders.push(format!("({})", row_placeholders.join(", ")));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        PgPool::qualify_table(schema, table),
        col_list,
        placeholders.join(", ")
    );

    (sql, params)
}

/// Text form of a value; PostgreSQL casts it to the column type.
fn sql_value_to_param(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Bool(b) => Some(b.to_string()),
        SqlValue::F64(n) => Some(n.to_string()),
        SqlValue::Decimal(d) => Some(d.to_string()),
        SqlValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        // PostgreSQL text cannot hold NUL.
        SqlValue::Text(s) => Some(s.replace('\0', "")),
    }
}
