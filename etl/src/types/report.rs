use serde::Serialize;

use crate::error::{ErrorKind, EtlError};
use crate::policy::build_error_handling_policy;

/// Outcome of a single output task, consumed by the host pipeline.
///
/// A report is produced for every task, including failed ones. Failed reports carry the error
/// rendering and an operator-facing solution derived from the error kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskReport {
    pub task_index: usize,
    pub success: bool,
    /// Fully qualified destination table, when known.
    pub table: Option<String>,
    /// Canonical partition spec that received the rows.
    pub partition: Option<String>,
    pub session_id: Option<String>,
    pub rows_written: u64,
    pub blocks_committed: u64,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<&'static str>,
}

impl TaskReport {
    /// Creates a successful report without destination details.
    pub fn succeeded(task_index: usize, rows_written: u64) -> Self {
        Self {
            task_index,
            success: true,
            table: None,
            partition: None,
            session_id: None,
            rows_written,
            blocks_committed: 0,
            error: None,
            error_kind: None,
            solution: None,
        }
    }

    /// Creates a failed report from the error that ended the task.
    pub fn failed(task_index: usize, error: &EtlError) -> Self {
        let policy = build_error_handling_policy(error);

        Self {
            task_index,
            success: false,
            table: None,
            partition: None,
            session_id: None,
            rows_written: 0,
            blocks_committed: 0,
            error: Some(error.to_string()),
            error_kind: Some(format!("{:?}", error.kind())),
            solution: policy.solution(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_partition(mut self, partition: Option<String>) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>, blocks_committed: u64) -> Self {
        self.session_id = Some(session_id.into());
        self.blocks_committed = blocks_committed;
        self
    }

    /// Returns `true` when the task failed with the given [`ErrorKind`].
    pub fn failed_with(&self, kind: ErrorKind) -> bool {
        !self.success && self.error_kind.as_deref() == Some(format!("{kind:?}").as_str())
    }
}
