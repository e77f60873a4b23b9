use etl::error::{ErrorKind, EtlError, EtlResult};
use etl::retry::RetryPolicy;
use etl::{bail, etl_error};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::maxcompute::client::{MaxComputeClient, TableRef};
use crate::maxcompute::statement::StatementRunner;

/// Ordered `key=value` pairs identifying one partition of a table.
///
/// Keys are stored lowercase and values without quotes. The canonical rendering quotes every value,
/// e.g. `pt='20240101',region='cn'`, and two specs are equal when their unquoted renderings are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionSpec {
    pairs: Vec<(String, String)>,
}

impl PartitionSpec {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(key, _)| key.as_str())
    }

    /// Returns the rendering without quotes, e.g. `pt=20240101,region=cn`.
    pub fn to_unquoted_string(&self) -> String {
        self.pairs
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns `true` when `remote` names the same partition.
    ///
    /// Remote specs that cannot be parsed are compared on their rendering with quotes removed.
    pub fn matches(&self, remote: &str) -> bool {
        match remote.parse::<PartitionSpec>() {
            Ok(remote) => remote == *self,
            Err(_) => remote.replace(['\'', '"'], "") == self.to_unquoted_string(),
        }
    }
}

/// Characters rejected in partition values.
const FORBIDDEN_VALUE_CHARS: &[char] = &['\'', '"', ';', '(', ')', '\\', '\n', '\r'];

impl FromStr for PartitionSpec {
    type Err = EtlError;

    /// Parses specs separated by `,` or `/`, with optionally quoted values.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut pairs: Vec<(String, String)> = Vec::new();

        for part in spec.split([',', '/']) {
            let part = part.trim();
            if part.is_empty() {
                bail!(
                    ErrorKind::ConfigError,
                    "Invalid partition spec",
                    format!("Partition spec '{spec}' contains an empty element")
                );
            }

            let Some((key, value)) = part.split_once('=') else {
                bail!(
                    ErrorKind::ConfigError,
                    "Invalid partition spec",
                    format!("Element '{part}' of partition spec '{spec}' has no '='")
                );
            };

            // Partition column names are case-insensitive on the service.
            let key = key.trim().to_lowercase();
            let value = unquote(value.trim());
            if key.is_empty() || value.is_empty() {
                bail!(
                    ErrorKind::ConfigError,
                    "Invalid partition spec",
                    format!("Element '{part}' of partition spec '{spec}' has an empty key or value")
                );
            }

            if !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                bail!(
                    ErrorKind::ConfigError,
                    "Invalid partition spec",
                    format!("Partition key '{key}' of '{spec}' may only contain letters, digits and '_'")
                );
            }

            // Values are rendered inside quotes in DDL statements.
            if let Some(forbidden) = value.chars().find(|c| FORBIDDEN_VALUE_CHARS.contains(c)) {
                bail!(
                    ErrorKind::ConfigError,
                    "Invalid partition spec",
                    format!("Partition value '{value}' of '{spec}' contains the forbidden character '{forbidden}'")
                );
            }

            if pairs.iter().any(|(existing, _)| *existing == key) {
                bail!(
                    ErrorKind::ConfigError,
                    "Invalid partition spec",
                    format!("Partition key '{key}' appears twice in '{spec}'")
                );
            }

            pairs.push((key, value.to_string()));
        }

        Ok(Self { pairs })
    }
}

impl fmt::Display for PartitionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.pairs.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}='{value}'")?;
        }

        Ok(())
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|value| value.strip_suffix(quote))
        {
            return inner;
        }
    }

    value
}

/// Partition lifecycle of a destination table: detection, creation and clearing.
#[derive(Debug, Clone)]
pub struct PartitionManager<C> {
    client: C,
    runner: StatementRunner<C>,
    policy: RetryPolicy,
}

impl<C> PartitionManager<C>
where
    C: MaxComputeClient,
{
    pub fn new(client: C, runner: StatementRunner<C>, policy: RetryPolicy) -> Self {
        Self {
            client,
            runner,
            policy,
        }
    }

    /// Returns `true` when the table declares at least one partition column.
    pub async fn is_partitioned(&self, table: &TableRef) -> EtlResult<bool> {
        let schema = self.client.get_table_schema(table).await?;

        Ok(schema.is_partitioned())
    }

    pub async fn partition_exists(&self, table: &TableRef, spec: &PartitionSpec) -> EtlResult<bool> {
        let partitions = self.client.list_partitions(table).await?;

        Ok(partitions.iter().any(|remote| spec.matches(remote)))
    }

    /// Creates the partition when it does not exist yet.
    ///
    /// Returns `true` when an add statement was run.
    pub async fn ensure_partition(&self, table: &TableRef, spec: &PartitionSpec) -> EtlResult<bool> {
        if !self.is_partitioned(table).await? {
            bail!(
                ErrorKind::PartitionError,
                "Table is not partitioned",
                format!("Cannot create partition {spec} on non-partitioned table {table}")
            );
        }

        if self.partition_exists(table, spec).await? {
            info!(%table, partition = %spec, "partition already exists");
            return Ok(false);
        }

        info!(%table, partition = %spec, "creating partition");

        let statement = format!(
            "ALTER TABLE {} ADD IF NOT EXISTS PARTITION ({spec});",
            table.full_table_name()
        );
        self.runner
            .run_with_retry(&statement, &self.policy)
            .await
            .map_err(|err| {
                etl_error!(
                    ErrorKind::PartitionError,
                    "Partition creation failed",
                    format!("Could not create partition {spec} on table {table}"),
                    source: err
                )
            })?;

        Ok(true)
    }

    /// Removes existing data before a write.
    ///
    /// Without a spec the whole table is truncated. With a spec the partition is dropped, and
    /// nothing is run when it does not exist. Dropping requires a partitioned table. Returns
    /// `true` when a statement was run.
    pub async fn clear_before_write(
        &self,
        table: &TableRef,
        spec: Option<&PartitionSpec>,
    ) -> EtlResult<bool> {
        let Some(spec) = spec else {
            info!(%table, "truncating table before write");

            let statement = format!("TRUNCATE TABLE {};", table.full_table_name());
            self.runner.run_with_retry(&statement, &self.policy).await?;

            return Ok(true);
        };

        if !self.is_partitioned(table).await? {
            bail!(
                ErrorKind::PartitionError,
                "Table is not partitioned",
                format!("Cannot drop partition {spec} of non-partitioned table {table}")
            );
        }

        if !self.partition_exists(table, spec).await? {
            info!(%table, partition = %spec, "partition does not exist, nothing to drop");
            return Ok(false);
        }

        info!(%table, partition = %spec, "dropping partition before write");

        let statement = format!(
            "ALTER TABLE {} DROP IF EXISTS PARTITION ({spec});",
            table.full_table_name()
        );
        self.runner
            .run_with_retry(&statement, &self.policy)
            .await
            .map_err(|err| {
                etl_error!(
                    ErrorKind::PartitionError,
                    "Partition drop failed",
                    format!("Could not drop partition {spec} of table {table}"),
                    source: err
                )
            })?;

        Ok(true)
    }
}
