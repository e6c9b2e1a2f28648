//! Source directory scanning and .dbf reading.

mod dbf;
mod memo;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use dbf::{DbfFile, DbfRecords};
pub use types::*;

use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// List the files in `dir` whose name ends in `.{extension}` (case-insensitive).
///
/// Entries are returned sorted by file name so runs are reproducible.
pub fn discover(dir: &Path, extension: &str) -> Result<Vec<SourceFile>> {
    let suffix = format!(".{}", extension.trim_start_matches('.').to_lowercase());

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.ends_with(&suffix) && name.len() > suffix.len() {
            files.push(SourceFile::new(entry.path()));
        }
    }

    files.sort_by_key(|f| f.file_name());
    debug!("Discovered {} source files in {}", files.len(), dir.display());
    Ok(files)
}
