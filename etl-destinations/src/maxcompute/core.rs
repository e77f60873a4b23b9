use etl::error::{ErrorKind, EtlError, EtlResult};
use etl::output::OutputPlugin;
use etl::retry::RetryPolicy;
use etl::source::RowSource;
use etl::types::{ColumnSchema, TaskReport};
use etl::{bail, etl_error};
use etl_config::shared::{MaxComputeConfig, MaxComputeConfigWithoutSecrets};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::maxcompute::client::{MaxComputeClient, TableRef};
use crate::maxcompute::encoding::FieldMapper;
use crate::maxcompute::metrics::register_metrics;
use crate::maxcompute::partition::{PartitionManager, PartitionSpec};
use crate::maxcompute::statement::StatementRunner;
use crate::maxcompute::validation::validate_mapped_fields;
use crate::maxcompute::writer::{UploadSessionWriter, UploadWriterConfig};

/// Bulk output writing every task into one MaxCompute upload session.
///
/// Each task prepares the destination (existence checks, optional clearing, partition creation),
/// streams its rows through a buffered writer and commits once. Any failure aborts the session so
/// none of the task's rows become visible.
#[derive(Debug, Clone)]
pub struct MaxComputeOutput<C> {
    client: C,
    config: Arc<MaxComputeConfig>,
}

impl<C> MaxComputeOutput<C>
where
    C: MaxComputeClient,
{
    pub fn new(client: C, config: MaxComputeConfig) -> Self {
        register_metrics();

        info!(
            config = ?MaxComputeConfigWithoutSecrets::from(config.clone()),
            "maxcompute output created"
        );

        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &MaxComputeConfig {
        &self.config
    }

    /// Resuming a partially written output is not supported.
    pub fn resume(&self) -> EtlResult<()> {
        bail!(
            ErrorKind::ConfigError,
            "MaxCompute output does not support resuming",
            format!(
                "Rerun the whole load into {} instead of resuming it",
                self.config.full_table_name()
            )
        );
    }

    fn table(&self) -> TableRef {
        TableRef::new(&self.config.project_name, &self.config.table_name)
    }

    fn partition_manager(&self) -> PartitionManager<C> {
        let runner = StatementRunner::new(
            self.client.clone(),
            Duration::from_millis(self.config.statement_poll_interval_ms),
        );

        PartitionManager::new(
            self.client.clone(),
            runner,
            RetryPolicy::from(&self.config.statement_retry),
        )
    }

    /// Runs every step of a task up to the commit. The writer is handed back through `slot` so
    /// that the caller can clean it up on every exit path.
    async fn write_task<R>(
        &self,
        task_index: usize,
        column_schemas: &[ColumnSchema],
        source: &mut R,
        slot: &mut Option<UploadSessionWriter<C>>,
    ) -> EtlResult<TaskReport>
    where
        R: RowSource,
    {
        self.config.validate().map_err(|err| {
            etl_error!(
                ErrorKind::ConfigError,
                "Invalid MaxCompute configuration",
                err.to_string(),
                source: err
            )
        })?;

        let table = self.table();
        let partition = self
            .config
            .partition
            .as_deref()
            .map(str::parse::<PartitionSpec>)
            .transpose()?;
        let mapper = FieldMapper::new(column_schemas, &self.config.column_mapping)?;

        info!(
            task_index,
            table = %table,
            partition = ?partition.as_ref().map(ToString::to_string),
            overwrite = self.config.overwrite,
            "starting maxcompute task"
        );

        if !self.client.table_exists(&table).await? {
            bail!(
                ErrorKind::ConfigError,
                "Destination table does not exist",
                format!("Table {table} was not found, create it before loading")
            );
        }

        let remote_schema = self.client.get_table_schema(&table).await?;
        match (&partition, remote_schema.is_partitioned()) {
            (Some(spec), false) => bail!(
                ErrorKind::ConfigError,
                "Partition configured for a non-partitioned table",
                format!("Table {table} has no partition columns but partition {spec} was configured")
            ),
            (None, true) => bail!(
                ErrorKind::ConfigError,
                "Partitioned table requires a partition",
                format!("Table {table} is partitioned, configure the partition to write into")
            ),
            _ => {}
        }
        if let Some(spec) = &partition
            && let Some(key) = spec
                .keys()
                .find(|key| !remote_schema.is_partition_column(key))
        {
            bail!(
                ErrorKind::ConfigError,
                "Partition key is not a partition column",
                format!(
                    "Partition key '{key}' of {spec} is not a partition column of table {table}, partition columns: {}",
                    remote_schema.partition_columns.join(", ")
                )
            );
        }
        validate_mapped_fields(&table, &mapper, &remote_schema)?;

        let partition_manager = self.partition_manager();
        if self.config.overwrite {
            partition_manager
                .clear_before_write(&table, partition.as_ref())
                .await?;
        }

        if let Some(spec) = &partition {
            partition_manager.ensure_partition(&table, spec).await?;
        }

        #[cfg(feature = "failpoints")]
        etl::failpoints::etl_fail_point(etl::failpoints::ORCHESTRATOR__AFTER_PARTITION_PREPARED)?;

        let writer = slot.insert(UploadSessionWriter::new(
            self.client.clone(),
            table.clone(),
            partition.clone(),
            UploadWriterConfig {
                tunnel_url: self.config.tunnel_url.clone(),
                buffer_size_bytes: self.config.buffer_size_bytes,
                write_policy: RetryPolicy::from(&self.config.write_retry),
            },
        ));

        writer.open().await?;
        let rows_written = writer.write_all(source, &mapper).await?;
        writer.commit().await?;

        let session_id = writer.session_id().unwrap_or_default().to_string();
        let blocks_committed = writer.block_ids().len() as u64;

        info!(
            task_index,
            table = %table,
            rows = rows_written,
            blocks = blocks_committed,
            "maxcompute task committed"
        );

        Ok(TaskReport::succeeded(task_index, rows_written)
            .with_table(table.full_table_name())
            .with_partition(partition.map(|spec| spec.to_string()))
            .with_session(session_id, blocks_committed))
    }
}

impl<C> OutputPlugin for MaxComputeOutput<C>
where
    C: MaxComputeClient,
{
    fn name() -> &'static str {
        "maxcompute"
    }

    async fn run_task<R>(
        &self,
        task_index: usize,
        column_schemas: &[ColumnSchema],
        mut source: R,
    ) -> EtlResult<TaskReport>
    where
        R: RowSource + 'static,
    {
        let mut writer = None;
        let mut result = self
            .write_task(task_index, column_schemas, &mut source, &mut writer)
            .await;

        if let Some(writer) = writer.as_mut()
            && let Err(cleanup_err) = writer.cleanup().await
        {
            warn!(task_index, error = %cleanup_err, "failed to abort upload session");

            // A failed abort is reported together with the error that caused it.
            result = result.map_err(|err| EtlError::from(vec![err, cleanup_err]));
        }

        if let Err(err) = source.close().await {
            warn!(task_index, error = %err, "failed to close row source");
        }

        if let Err(err) = &result {
            error!(
                task_index,
                project = %self.config.project_name,
                table = %self.config.table_name,
                partition = self.config.partition.as_deref(),
                error = %err,
                "maxcompute task failed"
            );
        }

        result
    }

    fn failure_report(&self, task_index: usize, error: &EtlError) -> TaskReport {
        TaskReport::failed(task_index, error)
            .with_table(self.config.full_table_name())
            .with_partition(self.config.partition.clone())
    }
}
