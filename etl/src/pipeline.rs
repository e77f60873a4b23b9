//! Drives output tasks on behalf of the host pipeline.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

use crate::error::{EtlError, EtlResult};
use crate::output::OutputPlugin;
use crate::source::RowSource;
use crate::types::{ColumnSchema, TaskReport};

/// Runs one output task per source concurrently and waits for all of them.
///
/// Task `i` reads from `sources[i]`. A failing or panicking task does not affect its siblings:
/// its error is converted into a failed [`TaskReport`] through
/// [`OutputPlugin::failure_report`]. Reports are returned in task index order.
pub async fn run_output_tasks<O, R>(
    output: O,
    column_schemas: Vec<ColumnSchema>,
    sources: Vec<R>,
) -> Vec<TaskReport>
where
    O: OutputPlugin + Clone + Send + Sync + 'static,
    R: RowSource + 'static,
{
    let column_schemas: Arc<[ColumnSchema]> = column_schemas.into();
    let tasks_number = sources.len();

    info!(
        output = O::name(),
        tasks = tasks_number,
        "starting output tasks"
    );

    let handles: Vec<JoinHandle<EtlResult<TaskReport>>> = sources
        .into_iter()
        .enumerate()
        .map(|(task_index, source)| {
            let output = output.clone();
            let column_schemas = column_schemas.clone();
            let span = info_span!("output_task", task_index);

            tokio::spawn(
                async move { output.run_task(task_index, &column_schemas, source).await }
                    .instrument(span),
            )
        })
        .collect();

    let mut reports = Vec::with_capacity(tasks_number);
    for (task_index, handle) in handles.into_iter().enumerate() {
        let result = handle.await.map_err(EtlError::from).and_then(|result| result);
        let report = match result {
            Ok(report) => report,
            Err(err) => {
                error!(task_index, error = %err, "output task failed");
                output.failure_report(task_index, &err)
            }
        };

        reports.push(report);
    }

    let failed = reports.iter().filter(|report| !report.success).count();
    info!(
        output = O::name(),
        tasks = tasks_number,
        failed,
        "output tasks completed"
    );

    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::output::memory::MemoryOutput;
    use crate::source::MemoryRowSource;
    use crate::types::{Cell, LogicalType, TableRow};

    fn rows(values: &[i64]) -> Vec<TableRow> {
        values
            .iter()
            .map(|value| TableRow::new(vec![Cell::I64(*value)]))
            .collect()
    }

    #[tokio::test]
    async fn failing_task_does_not_affect_siblings() {
        let output = MemoryOutput::new();
        let schemas = vec![ColumnSchema::new("id", LogicalType::Long)];
        let sources = vec![
            MemoryRowSource::new(rows(&[1, 2])),
            MemoryRowSource::new(rows(&[3, 4])).fail_after(1),
            MemoryRowSource::new(rows(&[5])),
        ];

        let reports = run_output_tasks(output.clone(), schemas, sources).await;

        assert_eq!(reports.len(), 3);
        assert!(reports[0].success);
        assert_eq!(reports[0].rows_written, 2);
        assert!(reports[1].failed_with(ErrorKind::InvalidData));
        assert_eq!(reports[1].task_index, 1);
        assert!(reports[2].success);

        let stored = output.table_rows().await;
        assert_eq!(stored.len(), 2);
        assert!(!stored.contains_key(&1));
    }
}
