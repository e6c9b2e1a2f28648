//! Error types for the migration library.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code when the destination cannot be reached.
pub const EXIT_CONNECTION_ERROR: u8 = 2;
/// Exit code when the target schema cannot be created.
pub const EXIT_SCHEMA_ERROR: u8 = 3;
/// Exit code when at least one table failed.
pub const EXIT_TABLE_ERROR: u8 = 4;
/// Exit code for target database errors outside a table load.
pub const EXIT_TARGET_ERROR: u8 = 5;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 6;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Destination unreachable or authentication failure.
    #[error("Could not connect to PostgreSQL: {0}")]
    Connection(String),

    /// The target schema DDL failed.
    #[error("Could not create schema {schema}: {message}")]
    SchemaCreation { schema: String, message: String },

    /// DDL or insert failure for a single table.
    #[error("Migration failed for table {table}: {message}")]
    Table { table: String, message: String },

    /// A source file could not be opened or parsed.
    #[error("Cannot read {}: {message}", path.display())]
    Source { path: PathBuf, message: String },

    /// Target database query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// One or more tables failed during an otherwise completed run.
    #[error("{failed} of {total} tables failed to migrate")]
    TablesFailed { failed: usize, total: usize },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The background migration task panicked or was aborted.
    #[error("Migration task failed: {0}")]
    Task(String),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Table error
    pub fn table(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Table {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Source error for a file.
    pub fn source(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        MigrateError::Source {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a SchemaCreation error.
    pub fn schema_creation(schema: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::SchemaCreation {
            schema: schema.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Connection(_) | MigrateError::Pool { .. } => EXIT_CONNECTION_ERROR,
            MigrateError::SchemaCreation { .. } => EXIT_SCHEMA_ERROR,
            MigrateError::Table { .. } | MigrateError::TablesFailed { .. } => EXIT_TABLE_ERROR,
            MigrateError::Target(_) | MigrateError::Json(_) | MigrateError::Task(_) => {
                EXIT_TARGET_ERROR
            }
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Source { .. } | MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Display an error followed by its sources.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
