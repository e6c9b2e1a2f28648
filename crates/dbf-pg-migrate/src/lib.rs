//! # dbf-pg-migrate
//!
//! dBase / FoxPro (`.dbf`) to PostgreSQL migration library.
//!
//! Every `.dbf` file in a directory becomes one table in a PostgreSQL schema:
//!
//! - **Schema inference** from the field directory of each file
//! - **Value sanitization** of fixed-width fields into typed values or NULL
//! - **Per-table transactions**: a failed table never leaves partial rows
//! - **Cooperative cancellation** between tables
//! - **Progress events** on a channel, a log file and `tracing`
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbf_pg_migrate::{Config, MigrationHandle, MigrationJob};
//!
//! #[tokio::main]
//! async fn main() -> dbf_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let (handle, mut events) = MigrationHandle::start(MigrationJob::from_config(&config)?);
//!     while let Some(event) = events.recv().await {
//!         println!("{}", event.message);
//!     }
//!     let result = handle.join().await?;
//!     println!("Migrated {} rows", result.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod sanitize;
pub mod schema;
pub mod source;
pub mod target;
pub mod transfer;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, SourceEncoding, TargetConfig};
pub use error::{MigrateError, Result};
pub use events::{EventLevel, MigrationEvent, ProgressSink};
pub use orchestrator::{
    inspect, MigrationHandle, MigrationJob, MigrationResult, Orchestrator, RunState,
};
pub use sanitize::ValueSanitizer;
pub use schema::ColumnDef;
pub use source::{DbfFile, FieldDescriptor, FieldType, RawRecord, RawValue, SourceFile};
pub use target::{PgPool, SqlValue, TargetPool};
pub use transfer::{TableLoader, TableResult, TableStatus};
pub use typemap::DestinationType;
