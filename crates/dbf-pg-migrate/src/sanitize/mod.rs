//! Raw field value conversion.
//!
//! Every raw value coming out of a source file is turned into a [`SqlValue`]
//! according to the field's declared type. Conversion never fails: values
//! that cannot be decoded or parsed become NULL. Row-level anomalies are not
//! reported individually.

use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::config::SourceEncoding;
use crate::source::{FieldDescriptor, FieldType, RawRecord, RawValue};
use crate::target::SqlValue;

/// Converts raw values into destination-ready values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueSanitizer {
    encoding: SourceEncoding,
}

impl ValueSanitizer {
    /// Create a sanitizer that decodes field bytes with `encoding`.
    pub fn new(encoding: SourceEncoding) -> Self {
        Self { encoding }
    }

    /// Convert one raw value given its declared type.
    pub fn sanitize(&self, raw: &RawValue, field_type: FieldType) -> SqlValue {
        match raw {
            RawValue::Absent => SqlValue::Null,
            RawValue::Number(n) => SqlValue::F64(*n),
            RawValue::Boolean(b) => SqlValue::Bool(*b),
            RawValue::Text(text) => interpret(text, field_type),
            RawValue::Binary(bytes) => {
                // Unwritten fixed-width fields are all NUL.
                if bytes.iter().all(|&b| b == 0) {
                    return SqlValue::Null;
                }
                match self.decode(bytes) {
                    Some(text) => interpret(&text, field_type),
                    None => SqlValue::Null,
                }
            }
        }
    }

    /// Convert a whole record positionally against its field descriptors.
    pub fn sanitize_record(&self, record: &RawRecord, fields: &[FieldDescriptor]) -> Vec<SqlValue> {
        fields
            .iter()
            .enumerate()
            .map(|(idx, field)| self.sanitize(record.value(idx), field.field_type))
            .collect()
    }

    fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self.encoding {
            SourceEncoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            SourceEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
        }
    }
}

/// Interpret decoded text per declared type.
fn interpret(text: &str, field_type: FieldType) -> SqlValue {
    let trimmed = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    match field_type {
        FieldType::Numeric => parse_numeric(trimmed).map_or(SqlValue::Null, SqlValue::Decimal),
        FieldType::Date => parse_date(trimmed).map_or(SqlValue::Null, SqlValue::Date),
        FieldType::Logical => SqlValue::Bool(parse_logical(trimmed)),
        FieldType::Other(_) if trimmed.is_empty() => SqlValue::Null,
        // PostgreSQL text cannot hold NUL; binary memos may contain it.
        FieldType::Other(_) if trimmed.contains('\0') => {
            SqlValue::Text(trimmed.replace('\0', ""))
        }
        FieldType::Other(_) => SqlValue::Text(trimmed.to_string()),
    }
}

/// Parse a decimal in plain or scientific notation.
pub fn parse_numeric(s: &str) -> Option<Decimal> {
    if s.is_empty()
        || !s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        || !s.chars().any(|c| c.is_ascii_digit())
    {
        return None;
    }

    Decimal::from_str(s)
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
}

/// Parse a strict `YYYYMMDD` date.
///
/// Year 0 has no PostgreSQL `date` equivalent and reads as no date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y%m%d")
        .ok()
        .filter(|date| date.year() >= 1)
}

/// `Y` or `T` (any case) is true; everything else is false.
pub fn parse_logical(s: &str) -> bool {
    s.eq_ignore_ascii_case("y") || s.eq_ignore_ascii_case("t")
}
