use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical type of a column as produced by the host pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalType {
    String,
    Boolean,
    /// 64-bit signed integer.
    Long,
    Double,
    /// Instant in UTC.
    Timestamp,
    Json,
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::String => "string",
            LogicalType::Boolean => "boolean",
            LogicalType::Long => "long",
            LogicalType::Double => "double",
            LogicalType::Timestamp => "timestamp",
            LogicalType::Json => "json",
        };

        f.write_str(name)
    }
}

/// Name and logical type of one column of the rows flowing through a task.
///
/// A task's row shape is an ordered `&[ColumnSchema]`; row values follow the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: LogicalType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: LogicalType) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}
