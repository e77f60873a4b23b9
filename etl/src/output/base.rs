use std::future::Future;

use crate::error::{EtlError, EtlResult};
use crate::source::RowSource;
use crate::types::{ColumnSchema, TaskReport};

/// Trait for systems that receive the rows of output tasks from the host pipeline.
///
/// The host splits its work into independent tasks, each identified by a task index and fed by
/// its own [`RowSource`]. Tasks may run concurrently, so implementations must not share mutable
/// per-task state. A task either commits everything it read or makes none of it visible.
pub trait OutputPlugin {
    /// Returns the name of the output.
    fn name() -> &'static str;

    /// Runs a single task, consuming rows from `source` until it is exhausted.
    ///
    /// `column_schemas` describes the order and logical types of every row's values. The source
    /// is closed before this method returns, on success and on failure.
    fn run_task<R>(
        &self,
        task_index: usize,
        column_schemas: &[ColumnSchema],
        source: R,
    ) -> impl Future<Output = EtlResult<TaskReport>> + Send
    where
        R: RowSource + 'static;

    /// Builds the report for a task that ended with `error`.
    ///
    /// Override this method to attach destination details to failure reports.
    fn failure_report(&self, task_index: usize, error: &EtlError) -> TaskReport {
        TaskReport::failed(task_index, error)
    }
}
