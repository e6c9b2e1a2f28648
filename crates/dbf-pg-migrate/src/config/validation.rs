//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.dir.as_os_str().is_empty() {
        return Err(MigrateError::Config("source.dir is required".into()));
    }
    let extension = config.source.extension.trim_start_matches('.');
    if extension.is_empty() {
        return Err(MigrateError::Config("source.extension cannot be empty".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.schema.trim().is_empty() {
        return Err(MigrateError::Config("target.schema cannot be empty".into()));
    }

    if config.migration.insert_batch_rows == 0 {
        return Err(MigrateError::Config(
            "migration.insert_batch_rows must be at least 1".into(),
        ));
    }

    Ok(())
}
