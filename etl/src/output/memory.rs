use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::EtlResult;
use crate::output::OutputPlugin;
use crate::source::RowSource;
use crate::types::{ColumnSchema, TableRow, TaskReport};

#[derive(Debug, Default)]
struct Inner {
    table_rows: BTreeMap<usize, Vec<TableRow>>,
}

/// In-memory output for testing and development purposes.
///
/// Rows are stored per task index and are lost when the process terminates. Rows of a task only
/// become visible once the task finished reading its source without error.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all committed rows, keyed by task index.
    pub async fn table_rows(&self) -> BTreeMap<usize, Vec<TableRow>> {
        let inner = self.inner.lock().await;
        inner.table_rows.clone()
    }
}

impl OutputPlugin for MemoryOutput {
    fn name() -> &'static str {
        "memory"
    }

    async fn run_task<R>(
        &self,
        task_index: usize,
        _column_schemas: &[ColumnSchema],
        mut source: R,
    ) -> EtlResult<TaskReport>
    where
        R: RowSource + 'static,
    {
        let mut rows = Vec::new();
        let result = loop {
            match source.next_row().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        source.close().await?;
        result?;

        info!(task_index, rows = rows.len(), "memory output committed task");

        let rows_written = rows.len() as u64;
        let mut inner = self.inner.lock().await;
        inner.table_rows.insert(task_index, rows);

        Ok(TaskReport::succeeded(task_index, rows_written).with_table(Self::name()))
    }
}
