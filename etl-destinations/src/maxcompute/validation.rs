use etl::bail;
use etl::error::{ErrorKind, EtlResult};

use crate::maxcompute::client::{RemoteTableSchema, TableRef};
use crate::maxcompute::encoding::FieldMapper;

/// Validates that every destination field of `mapper` is a data column of the remote table.
///
/// Names are compared case-insensitively. Partition columns cannot be written through records,
/// so mapping onto one is rejected as well.
pub fn validate_mapped_fields(
    table: &TableRef,
    mapper: &FieldMapper,
    schema: &RemoteTableSchema,
) -> EtlResult<()> {
    for field in mapper.fields() {
        if schema.is_partition_column(field) {
            bail!(
                ErrorKind::ConfigError,
                "Column maps onto a partition column",
                format!("Field '{field}' is a partition column of table {table} and cannot be written")
            );
        }

        if !schema.has_column(field) {
            bail!(
                ErrorKind::ConfigError,
                "Column missing in destination table",
                format!(
                    "Field '{field}' does not exist in table {table}, available columns: {}",
                    schema.columns.join(", ")
                )
            );
        }
    }

    Ok(())
}
