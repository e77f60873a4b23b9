use chrono::{DateTime, Utc};
use std::fmt;

use crate::types::LogicalType;

/// A single typed value inside a [`crate::types::TableRow`].
///
/// The variants follow the logical types a host pipeline can produce. [`Cell::Null`] is valid
/// for every column regardless of its logical type.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Cell {
    /// Returns `true` when the cell holds no value.
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Returns the logical type of the value, or [`None`] for [`Cell::Null`].
    pub fn logical_type(&self) -> Option<LogicalType> {
        match self {
            Cell::Null => None,
            Cell::Bool(_) => Some(LogicalType::Boolean),
            Cell::I64(_) => Some(LogicalType::Long),
            Cell::F64(_) => Some(LogicalType::Double),
            Cell::String(_) => Some(LogicalType::String),
            Cell::Timestamp(_) => Some(LogicalType::Timestamp),
            Cell::Json(_) => Some(LogicalType::Json),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => write!(f, "NULL"),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::I64(value) => write!(f, "{value}"),
            Cell::F64(value) => write!(f, "{value}"),
            Cell::String(value) => write!(f, "{value}"),
            Cell::Timestamp(value) => write!(f, "{}", value.to_rfc3339()),
            Cell::Json(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::I64(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::F64(value)
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<DateTime<Utc>> for Cell {
    fn from(value: DateTime<Utc>) -> Self {
        Cell::Timestamp(value)
    }
}

impl<T> From<Option<T>> for Cell
where
    T: Into<Cell>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Cell::Null)
    }
}
