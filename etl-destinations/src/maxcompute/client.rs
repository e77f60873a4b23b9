use etl::error::EtlResult;
use std::fmt;
use std::future::Future;

use crate::maxcompute::encoding::WireRecord;
use crate::maxcompute::partition::PartitionSpec;

/// Identifier of a remote statement instance returned by [`MaxComputeClient::submit_statement`].
pub type StatementHandle = String;

/// Identifier of a block inside an upload session.
pub type BlockId = u64;

/// Reference to a destination table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project: String,
    pub table: String,
}

impl TableRef {
    pub fn new(project: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            table: table.into(),
        }
    }

    /// Returns the fully qualified table name, `project.table`.
    pub fn full_table_name(&self) -> String {
        format!("{}.{}", self.project, self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.table)
    }
}

/// Column layout of a remote table as reported by the metadata service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTableSchema {
    /// Regular data columns, in table order.
    pub columns: Vec<String>,
    /// Partition columns, in partition key order. Empty for non-partitioned tables.
    pub partition_columns: Vec<String>,
}

impl RemoteTableSchema {
    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }

    /// Returns `true` when `name` is a data column, compared case-insensitively.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns
            .iter()
            .any(|column| column.eq_ignore_ascii_case(name))
    }

    pub fn is_partition_column(&self, name: &str) -> bool {
        self.partition_columns
            .iter()
            .any(|column| column.eq_ignore_ascii_case(name))
    }
}

/// Terminal and non-terminal states of a remote statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementStatus {
    Running,
    Success,
    /// The statement failed remotely. Carries the error message reported by the service.
    Failed(String),
    Cancelled,
}

/// A staging handle on the upload tunnel.
///
/// Blocks written to a session stay invisible until [`UploadSession::commit`] succeeds. Writing
/// the same block id twice replaces the earlier content of that block.
pub trait UploadSession: Send + Sync {
    fn id(&self) -> &str;

    /// Uploads one block of records.
    fn write_block(
        &self,
        block_id: BlockId,
        records: &[WireRecord],
    ) -> impl Future<Output = EtlResult<()>> + Send;

    /// Makes the listed blocks visible atomically.
    fn commit(&self, block_ids: &[BlockId]) -> impl Future<Output = EtlResult<()>> + Send;

    /// Discards every block written to the session.
    fn abort(&self) -> impl Future<Output = EtlResult<()>> + Send;
}

/// Transport and authentication client for the metadata, statement and tunnel services.
///
/// Clones share the underlying connection state and are handed to every task.
pub trait MaxComputeClient: Clone + Send + Sync + 'static {
    type Session: UploadSession + 'static;

    fn table_exists(&self, table: &TableRef) -> impl Future<Output = EtlResult<bool>> + Send;

    fn get_table_schema(
        &self,
        table: &TableRef,
    ) -> impl Future<Output = EtlResult<RemoteTableSchema>> + Send;

    /// Lists the partitions of a table as spec strings, e.g. `pt='20240101',region='cn'`.
    fn list_partitions(
        &self,
        table: &TableRef,
    ) -> impl Future<Output = EtlResult<Vec<String>>> + Send;

    /// Creates an upload session bound to `table` and, when given, to `partition`.
    fn create_upload_session(
        &self,
        table: &TableRef,
        partition: Option<&PartitionSpec>,
    ) -> impl Future<Output = EtlResult<Self::Session>> + Send;

    /// Submits `statement` as a remote task named `task_name`.
    fn submit_statement(
        &self,
        statement: &str,
        task_name: &str,
    ) -> impl Future<Output = EtlResult<StatementHandle>> + Send;

    fn poll_statement(
        &self,
        handle: &StatementHandle,
    ) -> impl Future<Output = EtlResult<StatementStatus>> + Send;
}
