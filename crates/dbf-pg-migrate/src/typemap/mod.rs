//! Type mapping between DBF field types and PostgreSQL.

use crate::source::FieldType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// PostgreSQL column type of a migrated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    Numeric,
    Date,
    Boolean,
    Text,
}

impl DestinationType {
    /// SQL type name used in DDL and casts.
    pub fn as_sql(&self) -> &'static str {
        match self {
            DestinationType::Numeric => "numeric",
            DestinationType::Date => "date",
            DestinationType::Boolean => "boolean",
            DestinationType::Text => "text",
        }
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Map a DBF field type to PostgreSQL.
pub fn dbf_to_postgres(field_type: FieldType) -> DestinationType {
    match field_type {
        FieldType::Numeric => DestinationType::Numeric,
        FieldType::Date => DestinationType::Date,
        FieldType::Logical => DestinationType::Boolean,
        // Character, memo, float, FoxPro binary types...
        FieldType::Other(_) => DestinationType::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        assert_eq!(dbf_to_postgres(FieldType::from_code(b'N')), DestinationType::Numeric);
        assert_eq!(dbf_to_postgres(FieldType::from_code(b'D')), DestinationType::Date);
        assert_eq!(dbf_to_postgres(FieldType::from_code(b'L')), DestinationType::Boolean);
        assert_eq!(dbf_to_postgres(FieldType::from_code(b'C')), DestinationType::Text);
    }

    #[test]
    fn test_every_code_maps_deterministically() {
        for code in 0..=u8::MAX {
            let first = dbf_to_postgres(FieldType::from_code(code));
            let second = dbf_to_postgres(FieldType::from_code(code));
            assert_eq!(first, second);
            let expected = match code.to_ascii_uppercase() {
                b'N' => DestinationType::Numeric,
                b'D' => DestinationType::Date,
                b'L' => DestinationType::Boolean,
                _ => DestinationType::Text,
            };
            assert_eq!(first, expected, "code {}", code);
        }
    }

    #[test]
    fn test_sql_names() {
        assert_eq!(DestinationType::Numeric.as_sql(), "numeric");
        assert_eq!(DestinationType::Boolean.to_string(), "boolean");
    }
}
