//! Migration orchestrator - main workflow coordinator.
//!
//! A run connects to PostgreSQL, makes sure the target schema exists, then
//! walks the source directory and loads one table per file, strictly in
//! sequence. Cancellation is checked between tables only: a table that has
//! started always runs to commit or rollback.

use crate::config::{Config, SourceConfig, TargetConfig};
use crate::error::{error_chain, MigrateError, Result};
use crate::events::{
    ChannelSink, FanoutSink, LogFileSink, MigrationEvent, ProgressSink, TracingSink,
};
use crate::sanitize::ValueSanitizer;
use crate::schema::{synthesize, ColumnDef};
use crate::source::{self, DbfFile, SourceFile};
use crate::target::{PgPool, TargetPool};
use crate::transfer::{TableLoader, TableResult, TableStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a run needs. Owned by the orchestrator for the run's lifetime.
pub struct MigrationJob {
    /// Destination connection parameters.
    pub target: TargetConfig,

    /// Destination schema.
    pub schema: String,

    /// Source directory and decoding options.
    pub source: SourceConfig,

    /// Upper bound on rows per INSERT statement.
    pub insert_batch_rows: usize,

    pub cancel: CancellationToken,

    pub sink: Arc<dyn ProgressSink>,
}

impl MigrationJob {
    /// Build a job from configuration.
    ///
    /// Events are mirrored to `tracing` and, when `migration.log_file` is
    /// set, appended to that file.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
        if let Some(path) = &config.migration.log_file {
            sink = sink.with(Arc::new(LogFileSink::open(path)?));
        }

        Ok(Self {
            target: config.target.clone(),
            schema: config.target.schema.clone(),
            source: config.source.clone(),
            insert_batch_rows: config.migration.insert_batch_rows,
            cancel: CancellationToken::new(),
            sink: Arc::new(sink),
        })
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replace the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    fn emit(&self, event: MigrationEvent) {
        self.sink.emit(event);
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Connecting,
    Running,
    /// Stopped at a table boundary on request.
    Cancelled,
    /// Every discovered file was processed (some tables may have failed).
    Completed,
    /// The destination was unreachable or the schema could not be created.
    ConnectionFailed,
    /// The source directory could not be listed.
    Failed,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final state.
    pub status: RunState,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Source files discovered.
    pub tables_total: usize,

    /// Tables successfully migrated.
    pub tables_success: usize,

    /// Tables that failed.
    pub tables_failed: usize,

    /// Tables skipped because their source had no fields.
    pub tables_skipped: usize,

    /// Total rows committed.
    pub rows_transferred: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    /// Per-table outcomes in processing order.
    pub tables: Vec<TableResult>,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Names of the tables that failed.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .map(|t| t.table.as_str())
            .collect()
    }
}

/// Row count comparison between a source file and its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountCheck {
    pub table: String,
    pub source_rows: u64,
    pub target_rows: i64,
    pub matches: bool,
}

/// What a source file would become, without touching the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInspection {
    pub file: String,
    pub table: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,

    /// Records including deleted ones, as declared by the header.
    pub record_count: u64,

    /// Records that would be loaded.
    pub active_records: u64,

    pub columns: Vec<ColumnDef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Migration orchestrator.
pub struct Orchestrator {
    job: MigrationJob,
    state: RunState,
}

impl Orchestrator {
    /// Create a new orchestrator in the idle state.
    pub fn new(job: MigrationJob) -> Self {
        Self {
            job,
            state: RunState::Idle,
        }
    }

    fn set_state(&mut self, state: RunState) {
        debug!("Run state: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Run the migration against PostgreSQL.
    pub async fn run(mut self) -> Result<MigrationResult> {
        self.set_state(RunState::Connecting);
        self.job.emit(MigrationEvent::info(format!(
            "Starting migration from {} to {}:{}/{} (schema {})",
            self.job.source.dir.display(),
            self.job.target.host,
            self.job.target.port,
            self.job.target.database,
            self.job.schema
        )));

        let pool = match PgPool::connect(&self.job.target, self.job.insert_batch_rows).await {
            Ok(pool) => pool,
            Err(e) => {
                self.set_state(RunState::ConnectionFailed);
                self.job.emit(MigrationEvent::error(format!(
                    "Connection error: {}",
                    error_chain(&e)
                )));
                return Err(e);
            }
        };
        self.job.emit(MigrationEvent::info("Connected to PostgreSQL"));

        let target: Arc<dyn TargetPool> = Arc::new(pool);
        let result = self.run_with_target(target.clone()).await;
        target.close().await;
        result
    }

    /// Run the migration against an already connected target.
    pub async fn run_with_target(
        mut self,
        target: Arc<dyn TargetPool>,
    ) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {}", run_id);

        if self.state == RunState::Idle {
            self.set_state(RunState::Connecting);
        }

        if let Err(e) = target.create_schema(&self.job.schema).await {
            let e = match e {
                e @ MigrateError::SchemaCreation { .. } => e,
                other => MigrateError::schema_creation(&self.job.schema, error_chain(&other)),
            };
            self.set_state(RunState::ConnectionFailed);
            self.job.emit(MigrationEvent::error(e.to_string()));
            return Err(e);
        }
        debug!("Schema {} ready on {}", self.job.schema, target.db_type());

        self.set_state(RunState::Running);
        let files = match source::discover(&self.job.source.dir, &self.job.source.extension) {
            Ok(files) => files,
            Err(e) => {
                self.set_state(RunState::Failed);
                self.job.emit(MigrationEvent::error(format!(
                    "Cannot list {}: {}",
                    self.job.source.dir.display(),
                    error_chain(&e)
                )));
                return Err(e);
            }
        };
        self.job.emit(MigrationEvent::info(format!(
            "Found {} files to migrate",
            files.len()
        )));

        let loader = TableLoader::new(
            target,
            self.job.sink.clone(),
            self.job.schema.clone(),
            ValueSanitizer::new(self.job.source.encoding),
        );

        let mut tables = Vec::with_capacity(files.len());
        for file in &files {
            if self.job.cancel.is_cancelled() {
                self.set_state(RunState::Cancelled);
                break;
            }
            tables.push(self.migrate_file(&loader, file).await);
        }
        if self.state == RunState::Running {
            self.set_state(RunState::Completed);
        }

        let result = summarize(run_id, self.state, started_at, files.len(), tables);
        match result.status {
            RunState::Cancelled => self.job.emit(MigrationEvent::warn(format!(
                "Migration cancelled by user after {} of {} tables",
                result.tables.len(),
                result.tables_total
            ))),
            _ => self.job.emit(
                MigrationEvent::info(format!(
                    "Migration completed: {} succeeded, {} failed, {} skipped, {} rows",
                    result.tables_success,
                    result.tables_failed,
                    result.tables_skipped,
                    result.rows_transferred
                ))
                .with_rows(result.rows_transferred),
            ),
        }

        info!(
            "Migration {:?}: {} tables, {} rows in {:.1}s ({} rows/s)",
            result.status,
            result.tables_total,
            result.rows_transferred,
            result.duration_seconds,
            result.rows_per_second
        );

        Ok(result)
    }

    async fn migrate_file(&self, loader: &TableLoader, file: &SourceFile) -> TableResult {
        let table = &file.table_name;
        debug!("{}: reading {}", table, file.path.display());

        let opened = DbfFile::open(&file.path).and_then(|dbf| {
            let records = dbf.records()?;
            Ok((dbf, records))
        });

        match opened {
            Ok((dbf, records)) => loader.load(table, dbf.fields(), records).await,
            Err(e) => {
                let detail = error_chain(&e);
                self.job.emit(
                    MigrationEvent::error(format!("Error migrating table {}: {}", table, detail))
                        .with_table(table.as_str()),
                );
                TableResult::failed(table.as_str(), detail)
            }
        }
    }

    /// Compare active record counts of every source file with its table.
    pub async fn validate(&self) -> Result<Vec<RowCountCheck>> {
        let pool = PgPool::connect(&self.job.target, self.job.insert_batch_rows).await?;
        let checks = self.validate_with_target(&pool).await;
        pool.close().await;
        checks
    }

    /// Row count comparison against an already connected target.
    pub async fn validate_with_target(&self, target: &dyn TargetPool) -> Result<Vec<RowCountCheck>> {
        let files = source::discover(&self.job.source.dir, &self.job.source.extension)?;
        let mut checks = Vec::with_capacity(files.len());

        for file in &files {
            let source_rows = DbfFile::open(&file.path)?.active_record_count()?;
            let target_rows = target
                .get_row_count(&self.job.schema, &file.table_name)
                .await
                .unwrap_or(0);

            let matches = source_rows as i64 == target_rows;
            if matches {
                info!("{}: {} rows (match)", file.table_name, source_rows);
            } else {
                warn!(
                    "{}: source={} target={} (MISMATCH)",
                    file.table_name, source_rows, target_rows
                );
            }

            checks.push(RowCountCheck {
                table: file.table_name.clone(),
                source_rows,
                target_rows,
                matches,
            });
        }

        Ok(checks)
    }
}

/// Describe every source file in `dir` without connecting anywhere.
///
/// A file that cannot be parsed is still listed, with its error.
pub fn inspect(dir: &Path, extension: &str) -> Result<Vec<TableInspection>> {
    let files = source::discover(dir, extension)?;

    Ok(files
        .iter()
        .map(|file| {
            let mut entry = TableInspection {
                file: file.file_name(),
                table: file.table_name.clone(),
                version: None,
                record_count: 0,
                active_records: 0,
                columns: Vec::new(),
                error: None,
            };
            let described = DbfFile::open(&file.path).and_then(|dbf| {
                let active = dbf.active_record_count()?;
                Ok((dbf, active))
            });
            match described {
                Ok((dbf, active)) => {
                    entry.version = Some(dbf.version());
                    entry.record_count = dbf.record_count() as u64;
                    entry.active_records = active;
                    entry.columns = synthesize(dbf.fields());
                }
                Err(e) => entry.error = Some(error_chain(&e)),
            }
            entry
        })
        .collect())
}

fn summarize(
    run_id: String,
    status: RunState,
    started_at: DateTime<Utc>,
    tables_total: usize,
    tables: Vec<TableResult>,
) -> MigrationResult {
    let completed_at = Utc::now();
    let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

    let count = |status: TableStatus| tables.iter().filter(|t| t.status == status).count();
    let tables_success = count(TableStatus::Success);
    let tables_failed = count(TableStatus::Failed);
    let tables_skipped = count(TableStatus::Skipped);
    let rows_transferred: u64 = tables.iter().map(|t| t.rows).sum();

    let rows_per_second = if duration > 0.0 {
        (rows_transferred as f64 / duration) as u64
    } else {
        0
    };

    MigrationResult {
        run_id,
        status,
        started_at,
        completed_at,
        duration_seconds: duration,
        tables_total,
        tables_success,
        tables_failed,
        tables_skipped,
        rows_transferred,
        rows_per_second,
        tables,
    }
}

/// A migration running on a background task.
pub struct MigrationHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<MigrationResult>>,
}

impl MigrationHandle {
    /// Spawn the run. Events are delivered on the returned receiver in
    /// addition to the job's own sink.
    pub fn start(job: MigrationJob) -> (Self, mpsc::UnboundedReceiver<MigrationEvent>) {
        let (channel, rx) = ChannelSink::channel();
        let sink = FanoutSink::new()
            .with(job.sink.clone())
            .with(Arc::new(channel));
        let job = job.with_sink(Arc::new(sink));
        let cancel = job.cancel.clone();

        let task = tokio::spawn(Orchestrator::new(job).run());
        (Self { cancel, task }, rx)
    }

    /// Request cancellation; honored before the next table starts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish.
    pub async fn join(self) -> Result<MigrationResult> {
        self.task
            .await
            .map_err(|e| MigrateError::Task(e.to_string()))?
    }
}
