use etl::error::{ErrorKind, EtlResult};
use etl::types::{Cell, ColumnSchema, LogicalType, SizeHint, TableRow};
use etl::{bail, etl_error};
use std::collections::{BTreeMap, HashSet};
use std::mem::size_of;
use std::sync::Arc;
use tracing::debug;

/// A single field value in the tunnel record format.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    String(String),
    Boolean(bool),
    Bigint(i64),
    Double(f64),
    /// Milliseconds since the Unix epoch, UTC.
    Datetime(i64),
}

/// One record ready to be appended to an upload block.
///
/// Field names are shared by every record produced by the same [`FieldMapper`].
#[derive(Debug, Clone, PartialEq)]
pub struct WireRecord {
    fields: Arc<[String]>,
    values: Vec<WireValue>,
}

impl WireRecord {
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn values(&self) -> &[WireValue] {
        &self.values
    }

    /// Returns the value of the named destination field.
    pub fn get(&self, field: &str) -> Option<&WireValue> {
        self.fields
            .iter()
            .position(|name| name == field)
            .and_then(|index| self.values.get(index))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SizeHint for WireRecord {
    fn size_hint(&self) -> usize {
        self.values.iter().fold(
            size_of::<WireRecord>() + self.values.capacity() * size_of::<WireValue>(),
            |total, value| match value {
                WireValue::String(value) => total.saturating_add(value.capacity()),
                _ => total,
            },
        )
    }
}

#[derive(Debug, Clone)]
struct MappedColumn {
    /// Position of the column in the incoming rows.
    index: usize,
    source_name: String,
    typ: LogicalType,
}

/// Converts rows into [`WireRecord`]s, renaming columns through an optional mapping.
///
/// Json columns are not supported by the tunnel record format and are skipped.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    columns: Vec<MappedColumn>,
    fields: Arc<[String]>,
    row_width: usize,
}

impl FieldMapper {
    /// Builds a mapper for rows shaped like `column_schemas`.
    ///
    /// Columns absent from `column_mapping` keep their name. Two columns resolving to the same
    /// destination name, compared case-insensitively, are a configuration error.
    pub fn new(
        column_schemas: &[ColumnSchema],
        column_mapping: &BTreeMap<String, String>,
    ) -> EtlResult<Self> {
        let mut columns = Vec::with_capacity(column_schemas.len());
        let mut fields = Vec::with_capacity(column_schemas.len());
        let mut seen = HashSet::new();

        for (index, column_schema) in column_schemas.iter().enumerate() {
            if column_schema.typ == LogicalType::Json {
                debug!(column = %column_schema.name, "skipping json column");
                continue;
            }

            let destination = column_mapping
                .get(&column_schema.name)
                .unwrap_or(&column_schema.name);

            if !seen.insert(destination.to_lowercase()) {
                bail!(
                    ErrorKind::ConfigError,
                    "Duplicate destination column",
                    format!(
                        "Column '{}' maps to destination column '{destination}' which is already mapped",
                        column_schema.name
                    )
                );
            }

            columns.push(MappedColumn {
                index,
                source_name: column_schema.name.clone(),
                typ: column_schema.typ,
            });
            fields.push(destination.clone());
        }

        Ok(Self {
            columns,
            fields: fields.into(),
            row_width: column_schemas.len(),
        })
    }

    /// Destination field names, in column order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Maps one row into a fresh record.
    pub fn map_row(&self, row: &TableRow) -> EtlResult<WireRecord> {
        if row.len() != self.row_width {
            bail!(
                ErrorKind::ConversionError,
                "Row column count mismatch",
                format!(
                    "Expected {} columns but got {} in table row",
                    self.row_width,
                    row.len()
                )
            );
        }

        let values = self
            .columns
            .iter()
            .map(|column| encode_cell(&row.values()[column.index], column))
            .collect::<EtlResult<Vec<_>>>()?;

        Ok(WireRecord {
            fields: self.fields.clone(),
            values,
        })
    }
}

/// Maps one row without reusing a [`FieldMapper`].
pub fn map_row(
    row: &TableRow,
    column_schemas: &[ColumnSchema],
    column_mapping: &BTreeMap<String, String>,
) -> EtlResult<WireRecord> {
    FieldMapper::new(column_schemas, column_mapping)?.map_row(row)
}

fn encode_cell(cell: &Cell, column: &MappedColumn) -> EtlResult<WireValue> {
    let value = match (column.typ, cell) {
        (_, Cell::Null) => WireValue::Null,
        (LogicalType::String, Cell::String(value)) => WireValue::String(value.clone()),
        (LogicalType::Boolean, Cell::Bool(value)) => WireValue::Boolean(*value),
        (LogicalType::Long, Cell::I64(value)) => WireValue::Bigint(*value),
        (LogicalType::Double, Cell::F64(value)) => WireValue::Double(*value),
        (LogicalType::Timestamp, Cell::Timestamp(value)) => {
            WireValue::Datetime(value.timestamp_millis())
        }
        (typ, cell) => {
            return Err(etl_error!(
                ErrorKind::ConversionError,
                "Cell does not match its column type",
                format!(
                    "Column '{}' is declared as {typ} but the cell holds {}",
                    column.source_name,
                    cell.logical_type()
                        .map(|typ| typ.to_string())
                        .unwrap_or_else(|| "null".to_string())
                )
            ));
        }
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn schemas() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("id", LogicalType::Long),
            ColumnSchema::new("name", LogicalType::String),
            ColumnSchema::new("active", LogicalType::Boolean),
            ColumnSchema::new("score", LogicalType::Double),
            ColumnSchema::new("created_at", LogicalType::Timestamp),
            ColumnSchema::new("payload", LogicalType::Json),
        ]
    }

    fn row() -> TableRow {
        TableRow::new(vec![
            Cell::I64(7),
            Cell::String("alice".to_string()),
            Cell::Bool(true),
            Cell::F64(1.5),
            Cell::Timestamp(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            Cell::Json(serde_json::json!({"a": 1})),
        ])
    }

    #[test]
    fn test_map_row_all_types() {
        let record = map_row(&row(), &schemas(), &BTreeMap::new()).unwrap();

        assert_eq!(
            record.fields(),
            &["id", "name", "active", "score", "created_at"]
        );
        assert_eq!(
            record.values(),
            &[
                WireValue::Bigint(7),
                WireValue::String("alice".to_string()),
                WireValue::Boolean(true),
                WireValue::Double(1.5),
                WireValue::Datetime(1_704_067_200_000),
            ]
        );
    }

    #[test]
    fn test_map_row_applies_mapping() {
        let mapping = BTreeMap::from([("name".to_string(), "user_name".to_string())]);
        let record = map_row(&row(), &schemas(), &mapping).unwrap();

        assert_eq!(record.len(), 5);
        assert_eq!(
            record.get("user_name"),
            Some(&WireValue::String("alice".to_string()))
        );
        assert!(record.get("name").is_none());
        assert_eq!(record.get("id"), Some(&WireValue::Bigint(7)));
    }

    #[test]
    fn test_map_row_nulls() {
        let row = TableRow::new(vec![Cell::Null; 6]);
        let record = map_row(&row, &schemas(), &BTreeMap::new()).unwrap();

        assert!(record.values().iter().all(|value| *value == WireValue::Null));
    }

    #[test]
    fn test_map_row_type_mismatch() {
        let mut values = row().into_values();
        values[0] = Cell::String("7".to_string());

        let err = map_row(&TableRow::new(values), &schemas(), &BTreeMap::new()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn test_map_row_width_mismatch() {
        let err = map_row(
            &TableRow::new(vec![Cell::I64(1)]),
            &schemas(),
            &BTreeMap::new(),
        )
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }

    #[test]
    fn test_duplicate_destination_is_config_error() {
        let mapping = BTreeMap::from([("name".to_string(), "ID".to_string())]);

        let err = FieldMapper::new(&schemas(), &mapping).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn test_records_do_not_share_values() {
        let mapper = FieldMapper::new(&schemas(), &BTreeMap::new()).unwrap();
        let first = mapper.map_row(&row()).unwrap();
        let second = mapper
            .map_row(&TableRow::new(vec![Cell::Null; 6]))
            .unwrap();

        assert_eq!(first.get("id"), Some(&WireValue::Bigint(7)));
        assert_eq!(second.get("id"), Some(&WireValue::Null));
    }

    #[test]
    fn test_size_hint_grows_with_string_payload() {
        let mapper = FieldMapper::new(
            &[ColumnSchema::new("name", LogicalType::String)],
            &BTreeMap::new(),
        )
        .unwrap();
        let small = mapper
            .map_row(&TableRow::new(vec![Cell::from("a")]))
            .unwrap();
        let large = mapper
            .map_row(&TableRow::new(vec![Cell::String("a".repeat(1024))]))
            .unwrap();

        assert!(large.size_hint() >= small.size_hint() + 1000);
    }
}
