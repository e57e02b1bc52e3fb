//! Row values moved between data paths.
//!
//! Values are always owned: rows cross task boundaries through the
//! bounded channel, so borrowing from a source buffer is not an option.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::LogicalType;

/// A single row, ordered by the owning path's column list.
pub type Row = Vec<Value>;

/// Cell value for type-safe row handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL (also the default for target columns absent from the source).
    Null,

    /// Boolean value.
    Bool(bool),

    /// 32-bit signed integer.
    I32(i32),

    /// 64-bit signed integer.
    I64(i64),

    /// 64-bit floating point.
    F64(f64),

    /// Decimal value with arbitrary precision.
    Decimal(Decimal),

    /// Text data (also used for CLOB columns).
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// UUID value.
    Uuid(Uuid),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Array of values.
    Array(Vec<Value>),
}

impl Value {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Logical type of this value, `None` for NULL.
    pub fn logical_type(&self) -> Option<LogicalType> {
        let t = match self {
            Value::Null => return None,
            Value::Bool(_) => LogicalType::Bool,
            Value::I32(_) => LogicalType::Int,
            Value::I64(_) => LogicalType::BigInt,
            Value::F64(_) => LogicalType::Double,
            Value::Decimal(_) => LogicalType::Decimal,
            Value::Text(_) => LogicalType::Text,
            Value::Bytes(_) => LogicalType::Binary,
            Value::Uuid(_) => LogicalType::Uuid,
            Value::Date(_) => LogicalType::Date,
            Value::Time(_) => LogicalType::Time,
            Value::DateTime(_) => LogicalType::Timestamp,
            Value::Array(_) => LogicalType::Array,
        };
        Some(t)
    }

    /// Integer view of the value, if it holds one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I32(v) => Some(i64::from(*v)),
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of the value, if it holds text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from(7), Value::I32(7));
        assert_eq!(Value::from("x"), Value::Text("x".to_string()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3i64)).as_i64(), Some(3));
    }

    #[test]
    fn test_logical_type() {
        assert_eq!(Value::Null.logical_type(), None);
        assert_eq!(Value::I64(1).logical_type(), Some(LogicalType::BigInt));
        assert_eq!(
            Value::Array(vec![Value::I32(1)]).logical_type(),
            Some(LogicalType::Array)
        );
    }
}
