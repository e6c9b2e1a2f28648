//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source directory configuration (.dbf files).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source file extension used when none is configured.
pub const DEFAULT_EXTENSION: &str = "dbf";

/// Where the .dbf files live and how to decode them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Directory scanned for source files.
    pub dir: PathBuf,

    /// Character encoding of text fields (default: latin1).
    #[serde(default)]
    pub encoding: SourceEncoding,

    /// File extension of source tables, without the dot (default: "dbf").
    #[serde(default = "default_extension")]
    pub extension: String,
}

/// Character encoding used to decode raw field bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceEncoding {
    /// ISO-8859-1; every byte maps to one char, so decoding never fails.
    #[default]
    #[serde(alias = "latin-1", alias = "iso-8859-1")]
    Latin1,

    /// UTF-8; invalid sequences decode to NULL.
    #[serde(alias = "utf-8")]
    Utf8,
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// Connect timeout in seconds, 0 disables it (default: 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Maximum rows per INSERT statement (default: 1000).
    /// Statements are further capped by the PostgreSQL bind-parameter limit.
    #[serde(default = "default_insert_batch_rows")]
    pub insert_batch_rows: usize,

    /// Append-only event log (default: "migration.log").
    #[serde(default = "default_log_file")]
    pub log_file: Option<PathBuf>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            insert_batch_rows: default_insert_batch_rows(),
            log_file: default_log_file(),
        }
    }
}

// Default value functions for serde
fn default_extension() -> String {
    DEFAULT_EXTENSION.to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_insert_batch_rows() -> usize {
    1_000
}

fn default_log_file() -> Option<PathBuf> {
    Some(PathBuf::from("migration.log"))
}
