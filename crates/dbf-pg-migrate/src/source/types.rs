//! Source file metadata and raw record types.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One discovered migration unit: a source file and its destination table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Full path to the file.
    pub path: PathBuf,

    /// Destination table name (file stem, lower-cased).
    pub table_name: String,
}

impl SourceFile {
    /// Build a source file entry, deriving the table name from the file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table_name = table_name_for(&path);
        Self { path, table_name }
    }

    /// File name as it appears in the directory listing.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Lower-cased file stem, e.g. `CLIENTE.DBF` -> `cliente`.
pub fn table_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Declared type of a source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// `N`: numeric stored as ASCII digits.
    Numeric,
    /// `D`: date stored as `YYYYMMDD`.
    Date,
    /// `L`: logical stored as one of `YyNnTtFf?`.
    Logical,
    /// Any other type code (character, memo, float, binary FoxPro types...).
    Other(u8),
}

impl FieldType {
    /// Classify a one-letter type code from the field directory.
    pub fn from_code(code: u8) -> Self {
        match code.to_ascii_uppercase() {
            b'N' => FieldType::Numeric,
            b'D' => FieldType::Date,
            b'L' => FieldType::Logical,
            _ => FieldType::Other(code),
        }
    }

    /// The one-letter type code.
    pub fn code(&self) -> char {
        match self {
            FieldType::Numeric => 'N',
            FieldType::Date => 'D',
            FieldType::Logical => 'L',
            FieldType::Other(code) => *code as char,
        }
    }
}

/// Metadata entry describing one column of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name as stored in the file.
    pub name: String,

    /// Declared type.
    pub field_type: FieldType,

    /// Width in bytes inside each record.
    pub length: u8,

    /// Decimal count for numeric fields.
    pub decimal_count: u8,
}

impl FieldDescriptor {
    /// Create a descriptor from a name and type code.
    pub fn new(name: impl Into<String>, code: u8, length: u8, decimal_count: u8) -> Self {
        Self {
            name: name.into(),
            field_type: FieldType::from_code(code),
            length,
            decimal_count,
        }
    }
}

/// An untyped field value as produced by the source reader.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    /// Raw fixed-width bytes.
    Binary(Vec<u8>),
    /// Already decoded text.
    Text(String),
    /// Already typed number.
    Number(f64),
    /// Already typed boolean.
    Boolean(bool),
    /// No value.
    Absent,
}

/// One source row: field names paired with their raw values, in field order.
#[derive(Debug, Clone)]
pub struct RawRecord {
    names: Arc<[String]>,
    values: Vec<RawValue>,
}

impl RawRecord {
    /// Pair shared field names with a row of values.
    ///
    /// Missing trailing values read as [`RawValue::Absent`].
    pub fn new(names: Arc<[String]>, values: Vec<RawValue>) -> Self {
        Self { names, values }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Value at a field position.
    pub fn value(&self, idx: usize) -> &RawValue {
        self.values.get(idx).unwrap_or(&RawValue::Absent)
    }

    /// Value for a field name (exact match).
    pub fn get(&self, name: &str) -> Option<&RawValue> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.value(idx))
    }

    /// Iterate `(name, value)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.names
            .iter()
            .enumerate()
            .map(move |(idx, name)| (name.as_str(), self.value(idx)))
    }
}
