//! Structural definitions of data paths: ordered columns with logical types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage-independent column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    Bool,
    Int,
    BigInt,
    Double,
    Decimal,
    Text,
    Clob,
    Binary,
    Uuid,
    Date,
    Time,
    Timestamp,
    Array,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogicalType::Bool => "bool",
            LogicalType::Int => "int",
            LogicalType::BigInt => "bigint",
            LogicalType::Double => "double",
            LogicalType::Decimal => "decimal",
            LogicalType::Text => "text",
            LogicalType::Clob => "clob",
            LogicalType::Binary => "binary",
            LogicalType::Uuid => "uuid",
            LogicalType::Date => "date",
            LogicalType::Time => "time",
            LogicalType::Timestamp => "timestamp",
            LogicalType::Array => "array",
        };
        f.write_str(s)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Logical data type.
    pub data_type: LogicalType,

    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl Column {
    /// Create a nullable column.
    pub fn new(name: impl Into<String>, data_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Mark the column as NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Ordered column list of a data path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    /// Columns in storage order.
    pub columns: Vec<Column>,
}

impl Definition {
    /// Create a definition from columns.
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True for a resource that has no structure yet.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Index of a column by case-insensitive name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

impl FromIterator<Column> for Definition {
    fn from_iter<I: IntoIterator<Item = Column>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_is_case_insensitive() {
        let def = Definition::new(vec![
            Column::new("Id", LogicalType::Int).not_null(),
            Column::new("Name", LogicalType::Text),
        ]);
        assert_eq!(def.position("id"), Some(0));
        assert_eq!(def.position("NAME"), Some(1));
        assert_eq!(def.position("missing"), None);
        assert!(!def.columns[0].nullable);
    }

    #[test]
    fn test_empty_definition() {
        let def = Definition::default();
        assert!(def.is_empty());
        assert_eq!(def.len(), 0);
    }
}
