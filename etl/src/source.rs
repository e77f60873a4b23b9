//! Pull-style row sources feeding output tasks.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::types::TableRow;

/// A stream of rows consumed by a single output task.
///
/// Rows are pulled one at a time until [`RowSource::next_row`] returns `Ok(None)`. The consumer
/// calls [`RowSource::close`] exactly once when it stops reading, whether the stream was drained
/// or not.
pub trait RowSource: Send {
    /// Returns the next row, `Ok(None)` at the end of the stream, or an error when the source
    /// failed.
    fn next_row(&mut self) -> impl Future<Output = EtlResult<Option<TableRow>>> + Send;

    /// Releases resources held by the source. The default implementation is a no-op.
    fn close(&mut self) -> impl Future<Output = EtlResult<()>> + Send {
        async { Ok(()) }
    }
}

/// In-memory [`RowSource`] backed by a queue of rows.
///
/// Can be configured to fail after a number of rows, which is how tests simulate a broken
/// upstream.
#[derive(Debug)]
pub struct MemoryRowSource {
    rows: VecDeque<TableRow>,
    fail_after: Option<usize>,
    emitted: usize,
    closed: Arc<AtomicBool>,
}

impl MemoryRowSource {
    pub fn new(rows: Vec<TableRow>) -> Self {
        Self {
            rows: rows.into(),
            fail_after: None,
            emitted: 0,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes the source return an error once `rows` rows have been emitted.
    pub fn fail_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }

    /// Returns a flag that flips to `true` when the source is closed.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

impl RowSource for MemoryRowSource {
    async fn next_row(&mut self) -> EtlResult<Option<TableRow>> {
        if self.fail_after.is_some_and(|limit| self.emitted >= limit) {
            return Err(etl_error!(
                ErrorKind::InvalidData,
                "Row source failed",
                format!("The source failed after emitting {} rows", self.emitted)
            ));
        }

        let row = self.rows.pop_front();
        if row.is_some() {
            self.emitted += 1;
        }

        Ok(row)
    }

    async fn close(&mut self) -> EtlResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
