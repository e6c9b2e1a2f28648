//! In-memory target used by tests.

use super::{SqlValue, TargetPool};
use crate::error::{MigrateError, Result};
use crate::schema::ColumnDef;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryTable {
    pub(crate) columns: Vec<ColumnDef>,
    pub(crate) rows: Vec<Vec<SqlValue>>,
}

#[derive(Debug, Default)]
struct State {
    schemas: BTreeSet<String>,
    tables: BTreeMap<String, MemoryTable>,
    calls: Vec<String>,
}

/// Records DDL and rows instead of talking to a server.
#[derive(Debug, Default)]
pub(crate) struct MemoryTarget {
    state: Mutex<State>,
    fail_inserts: HashSet<String>,
    fail_schema: bool,
}

impl MemoryTarget {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every insert into `table` fail like a constraint violation.
    pub(crate) fn failing_insert(mut self, table: &str) -> Self {
        self.fail_inserts.insert(table.to_string());
        self
    }

    /// Make schema creation fail.
    pub(crate) fn failing_schema(mut self) -> Self {
        self.fail_schema = true;
        self
    }

    pub(crate) fn table(&self, schema: &str, table: &str) -> Option<MemoryTable> {
        let state = self.state.lock().unwrap();
        state.tables.get(&key(schema, table)).cloned()
    }

    pub(crate) fn has_schema(&self, schema: &str) -> bool {
        self.state.lock().unwrap().schemas.contains(schema)
    }

    /// Operations in call order, e.g. `create_table erp.cliente`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

fn key(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

#[async_trait]
impl TargetPool for MemoryTarget {
    async fn create_schema(&self, schema: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_schema {}", schema));
        if self.fail_schema {
            return Err(MigrateError::schema_creation(
                schema,
                "permission denied for database",
            ));
        }
        state.schemas.insert(schema.to_string());
        Ok(())
    }

    async fn create_table(&self, schema: &str, table: &str, columns: &[ColumnDef]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_table {}", key(schema, table)));
        if !state.schemas.contains(schema) {
            return Err(MigrateError::table(
                table,
                format!("schema \"{}\" does not exist", schema),
            ));
        }
        state
            .tables
            .entry(key(schema, table))
            .or_insert_with(|| MemoryTable {
                columns: columns.to_vec(),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn insert_rows(
        &self,
        schema: &str,
        table: &str,
        _columns: &[ColumnDef],
        rows: &[Vec<SqlValue>],
    ) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("insert_rows {} {}", key(schema, table), rows.len()));
        if self.fail_inserts.contains(table) {
            return Err(MigrateError::table(
                table,
                "duplicate key value violates unique constraint",
            ));
        }
        let stored = state
            .tables
            .get_mut(&key(schema, table))
            .ok_or_else(|| MigrateError::table(table, "relation does not exist"))?;
        stored.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn get_row_count(&self, schema: &str, table: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(&key(schema, table))
            .map(|t| t.rows.len() as i64)
            .ok_or_else(|| MigrateError::table(table, "relation does not exist"))
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {}
}
