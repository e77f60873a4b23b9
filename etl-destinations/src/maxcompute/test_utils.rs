//! In-memory [`MaxComputeClient`] for tests.

use etl::error::{ErrorKind, EtlResult};
use etl::{bail, etl_error};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::maxcompute::client::{
    BlockId, MaxComputeClient, RemoteTableSchema, StatementHandle, StatementStatus, TableRef,
    UploadSession,
};
use crate::maxcompute::encoding::WireRecord;
use crate::maxcompute::partition::PartitionSpec;

/// A remote call observed by [`FakeMaxComputeClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    TableExists(String),
    GetTableSchema(String),
    ListPartitions(String),
    CreateUploadSession {
        table: String,
        partition: Option<String>,
    },
    SubmitStatement {
        statement: String,
        task_name: String,
    },
    PollStatement(StatementHandle),
    WriteBlock {
        session_id: String,
        block_id: BlockId,
        records: usize,
    },
    Commit {
        session_id: String,
        block_ids: Vec<BlockId>,
    },
    Abort {
        session_id: String,
    },
}

/// Remote table state held by the fake service.
#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub schema: RemoteTableSchema,
    /// Existing partitions, as the service renders them.
    pub partitions: Vec<String>,
    /// Committed records keyed by canonical partition spec, `None` for non-partitioned tables.
    pub records: BTreeMap<Option<String>, Vec<WireRecord>>,
}

impl FakeTable {
    pub fn new(columns: &[&str]) -> Self {
        Self::partitioned(columns, &[])
    }

    pub fn partitioned(columns: &[&str], partition_columns: &[&str]) -> Self {
        Self {
            schema: RemoteTableSchema {
                columns: columns.iter().map(|column| column.to_string()).collect(),
                partition_columns: partition_columns
                    .iter()
                    .map(|column| column.to_string())
                    .collect(),
            },
            ..Self::default()
        }
    }

    pub fn with_partition(mut self, partition: &str) -> Self {
        self.partitions.push(partition.to_string());
        self
    }
}

#[derive(Debug)]
struct StatementRun {
    statement: String,
    remaining_running_polls: u32,
    failed: bool,
}

#[derive(Debug)]
struct SessionState {
    table: TableRef,
    partition: Option<String>,
    blocks: BTreeMap<BlockId, Vec<WireRecord>>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableRef, FakeTable>,
    calls: Vec<RemoteCall>,
    statements: HashMap<StatementHandle, StatementRun>,
    sessions: HashMap<String, SessionState>,
    next_id: u64,
    running_polls: u32,
    failing_statements: u32,
    failing_block_writes: u32,
    fail_commits: bool,
    fail_aborts: bool,
    fail_session_creation: bool,
    metadata_failure: Option<ErrorKind>,
}

impl Inner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn table_mut(&mut self, table: &TableRef) -> EtlResult<&mut FakeTable> {
        match self.tables.get_mut(table) {
            Some(fake_table) => Ok(fake_table),
            None => bail!(
                ErrorKind::DestinationTableMissing,
                "Table not found",
                format!("Table {table} does not exist")
            ),
        }
    }

    /// Applies the effect of a successful DDL statement.
    fn apply_statement(&mut self, statement: &str) -> EtlResult<()> {
        let upper = statement.to_uppercase();
        let Some(table) = self.statement_table(statement) else {
            return Ok(());
        };
        let fake_table = self.table_mut(&table)?;

        if upper.starts_with("TRUNCATE TABLE") {
            fake_table.records.clear();
            return Ok(());
        }

        let Some(spec) = statement_partition(statement) else {
            return Ok(());
        };

        if upper.contains(" ADD IF NOT EXISTS PARTITION") {
            if !fake_table
                .partitions
                .iter()
                .any(|existing| spec.matches(existing))
            {
                fake_table.partitions.push(spec.to_string());
            }
        } else if upper.contains(" DROP IF EXISTS PARTITION") {
            fake_table
                .partitions
                .retain(|existing| !spec.matches(existing));
            fake_table.records.remove(&Some(spec.to_string()));
        }

        Ok(())
    }

    fn statement_table(&self, statement: &str) -> Option<TableRef> {
        let name = statement
            .split_whitespace()
            .nth(2)?
            .trim_end_matches(';');
        let (project, table) = name.split_once('.')?;

        Some(TableRef::new(project, table))
    }
}

fn statement_partition(statement: &str) -> Option<PartitionSpec> {
    let start = statement.find('(')?;
    let end = statement.rfind(')')?;

    statement.get(start + 1..end)?.parse().ok()
}

/// In-memory MaxCompute service that records every call and supports injected failures.
#[derive(Debug, Clone, Default)]
pub struct FakeMaxComputeClient {
    inner: Arc<Mutex<Inner>>,
}

impl FakeMaxComputeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_table(&self, table: TableRef, fake_table: FakeTable) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(table, fake_table);
    }

    /// Makes every statement report [`StatementStatus::Running`] for `polls` polls first.
    pub async fn set_running_polls(&self, polls: u32) {
        self.inner.lock().await.running_polls = polls;
    }

    /// Makes the next `count` submitted statements end in [`StatementStatus::Failed`].
    pub async fn fail_next_statements(&self, count: u32) {
        self.inner.lock().await.failing_statements = count;
    }

    /// Makes the next `count` block uploads fail.
    pub async fn fail_next_block_writes(&self, count: u32) {
        self.inner.lock().await.failing_block_writes = count;
    }

    pub async fn fail_commits(&self, fail: bool) {
        self.inner.lock().await.fail_commits = fail;
    }

    pub async fn fail_aborts(&self, fail: bool) {
        self.inner.lock().await.fail_aborts = fail;
    }

    /// Makes metadata lookups fail with `kind`, as an unreachable or unauthorized service would.
    pub async fn fail_metadata(&self, kind: Option<ErrorKind>) {
        self.inner.lock().await.metadata_failure = kind;
    }

    pub async fn fail_session_creation(&self, fail: bool) {
        self.inner.lock().await.fail_session_creation = fail;
    }

    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Returns every submitted statement, in submission order.
    pub async fn submitted_statements(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                RemoteCall::SubmitStatement { statement, .. } => Some(statement),
                _ => None,
            })
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.count_calls(|call| matches!(call, RemoteCall::CreateUploadSession { .. }))
            .await
    }

    pub async fn commit_count(&self) -> usize {
        self.count_calls(|call| matches!(call, RemoteCall::Commit { .. }))
            .await
    }

    pub async fn abort_count(&self) -> usize {
        self.count_calls(|call| matches!(call, RemoteCall::Abort { .. }))
            .await
    }

    /// Returns the committed records of every partition of `table`.
    pub async fn committed_records(&self, table: &TableRef) -> Vec<WireRecord> {
        let inner = self.inner.lock().await;

        inner
            .tables
            .get(table)
            .map(|fake_table| fake_table.records.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn partitions(&self, table: &TableRef) -> Vec<String> {
        let inner = self.inner.lock().await;

        inner
            .tables
            .get(table)
            .map(|fake_table| fake_table.partitions.clone())
            .unwrap_or_default()
    }

    async fn count_calls(&self, predicate: impl Fn(&RemoteCall) -> bool) -> usize {
        self.inner
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }
}

impl MaxComputeClient for FakeMaxComputeClient {
    type Session = FakeUploadSession;

    async fn table_exists(&self, table: &TableRef) -> EtlResult<bool> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::TableExists(table.to_string()));

        if let Some(kind) = inner.metadata_failure {
            bail!(
                kind,
                "Metadata lookup failed",
                format!("Injected failure while looking up {table}")
            );
        }

        Ok(inner.tables.contains_key(table))
    }

    async fn get_table_schema(&self, table: &TableRef) -> EtlResult<RemoteTableSchema> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::GetTableSchema(table.to_string()));

        Ok(inner.table_mut(table)?.schema.clone())
    }

    async fn list_partitions(&self, table: &TableRef) -> EtlResult<Vec<String>> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::ListPartitions(table.to_string()));

        Ok(inner.table_mut(table)?.partitions.clone())
    }

    async fn create_upload_session(
        &self,
        table: &TableRef,
        partition: Option<&PartitionSpec>,
    ) -> EtlResult<FakeUploadSession> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::CreateUploadSession {
            table: table.to_string(),
            partition: partition.map(ToString::to_string),
        });

        if inner.fail_session_creation {
            bail!(
                ErrorKind::DestinationConnectionFailed,
                "Tunnel unavailable",
                format!("Could not reach the tunnel for {table}")
            );
        }
        inner.table_mut(table)?;

        let id = inner.next_id("session");
        inner.sessions.insert(
            id.clone(),
            SessionState {
                table: table.clone(),
                partition: partition.map(ToString::to_string),
                blocks: BTreeMap::new(),
            },
        );

        Ok(FakeUploadSession {
            id,
            inner: self.inner.clone(),
        })
    }

    async fn submit_statement(&self, statement: &str, task_name: &str) -> EtlResult<StatementHandle> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::SubmitStatement {
            statement: statement.to_string(),
            task_name: task_name.to_string(),
        });

        let failed = inner.failing_statements > 0;
        if failed {
            inner.failing_statements -= 1;
        }

        let handle = inner.next_id("instance");
        let remaining_running_polls = inner.running_polls;
        inner.statements.insert(
            handle.clone(),
            StatementRun {
                statement: statement.to_string(),
                remaining_running_polls,
                failed,
            },
        );

        Ok(handle)
    }

    async fn poll_statement(&self, handle: &StatementHandle) -> EtlResult<StatementStatus> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::PollStatement(handle.clone()));

        let Some(run) = inner.statements.get_mut(handle) else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Unknown statement instance",
                format!("Instance {handle} does not exist")
            );
        };

        if run.remaining_running_polls > 0 {
            run.remaining_running_polls -= 1;
            return Ok(StatementStatus::Running);
        }

        if run.failed {
            return Ok(StatementStatus::Failed("injected failure".to_string()));
        }

        let statement = run.statement.clone();
        inner.apply_statement(&statement)?;

        Ok(StatementStatus::Success)
    }
}

/// Upload session of a [`FakeMaxComputeClient`].
#[derive(Debug)]
pub struct FakeUploadSession {
    id: String,
    inner: Arc<Mutex<Inner>>,
}

impl UploadSession for FakeUploadSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_block(&self, block_id: BlockId, records: &[WireRecord]) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::WriteBlock {
            session_id: self.id.clone(),
            block_id,
            records: records.len(),
        });

        if inner.failing_block_writes > 0 {
            inner.failing_block_writes -= 1;
            bail!(
                ErrorKind::DestinationIoError,
                "Block upload interrupted",
                format!("Injected failure for block {block_id}")
            );
        }

        let session = inner.sessions.get_mut(&self.id).ok_or_else(|| {
            etl_error!(
                ErrorKind::InvalidState,
                "Unknown session",
                format!("Session {} does not exist", self.id)
            )
        })?;
        session.blocks.insert(block_id, records.to_vec());

        Ok(())
    }

    async fn commit(&self, block_ids: &[BlockId]) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::Commit {
            session_id: self.id.clone(),
            block_ids: block_ids.to_vec(),
        });

        if inner.fail_commits {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "Commit rejected",
                format!("Injected commit failure for session {}", self.id)
            );
        }

        let Some(session) = inner.sessions.remove(&self.id) else {
            bail!(
                ErrorKind::InvalidState,
                "Unknown session",
                format!("Session {} does not exist", self.id)
            );
        };

        let mut records = Vec::new();
        for block_id in block_ids {
            let Some(block) = session.blocks.get(block_id) else {
                bail!(
                    ErrorKind::InvalidState,
                    "Unknown block",
                    format!("Block {block_id} was never written to session {}", self.id)
                );
            };
            records.extend(block.iter().cloned());
        }

        inner
            .table_mut(&session.table)?
            .records
            .entry(session.partition)
            .or_default()
            .extend(records);

        Ok(())
    }

    async fn abort(&self) -> EtlResult<()> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::Abort {
            session_id: self.id.clone(),
        });

        if inner.fail_aborts {
            bail!(
                ErrorKind::DestinationConnectionFailed,
                "Session abort failed",
                format!("Injected abort failure for session {}", self.id)
            );
        }
        inner.sessions.remove(&self.id);

        Ok(())
    }
}
