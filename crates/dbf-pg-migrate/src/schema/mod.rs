//! Destination table definitions derived from source field descriptors.

use crate::source::FieldDescriptor;
use crate::typemap::{dbf_to_postgres, DestinationType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Lower-cased column name.
    pub name: String,

    /// PostgreSQL type.
    pub data_type: DestinationType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DestinationType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Build the destination column list: lower-cased names, mapped types,
/// source order. Names are not deduplicated.
pub fn synthesize(fields: &[FieldDescriptor]) -> Vec<ColumnDef> {
    fields
        .iter()
        .map(|f| ColumnDef::new(f.name.to_lowercase(), dbf_to_postgres(f.field_type)))
        .collect()
}

/// Column names that appear more than once, in first-seen order.
pub fn duplicate_columns(columns: &[ColumnDef]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for col in columns {
        if !seen.insert(col.name.as_str()) && !duplicates.contains(&col.name) {
            duplicates.push(col.name.clone());
        }
    }
    duplicates
}
