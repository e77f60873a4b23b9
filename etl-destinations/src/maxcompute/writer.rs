use etl::error::{ErrorKind, EtlResult};
use etl::retry::RetryPolicy;
use etl::source::RowSource;
use etl::types::SizeHint;
use etl::{bail, etl_error};
use metrics::{counter, histogram};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::maxcompute::client::{BlockId, MaxComputeClient, TableRef, UploadSession};
use crate::maxcompute::encoding::{FieldMapper, WireRecord};
use crate::maxcompute::metrics::{
    ETL_MC_BLOCK_WRITE_RETRIES_TOTAL, ETL_MC_BLOCKS_FLUSHED_TOTAL, ETL_MC_COMMIT_DURATION_SECONDS,
    ETL_MC_ROWS_WRITTEN_TOTAL,
};
use crate::maxcompute::partition::PartitionSpec;

/// Lifecycle of an [`UploadSessionWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Idle,
    SessionOpen,
    Writing,
    Closed,
    Committed,
    Aborted,
}

impl WriterState {
    /// Returns `true` when a session exists that was neither committed nor aborted.
    fn has_pending_session(&self) -> bool {
        matches!(
            self,
            WriterState::SessionOpen | WriterState::Writing | WriterState::Closed
        )
    }
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Settings for an [`UploadSessionWriter`].
#[derive(Debug, Clone)]
pub struct UploadWriterConfig {
    pub tunnel_url: Option<String>,
    /// A block is flushed whenever the buffered records reach this size.
    pub buffer_size_bytes: usize,
    pub write_policy: RetryPolicy,
}

/// Owns exactly one upload session and writes a task's rows into it.
///
/// The session is opened once, written once, and committed at most once. A session that was
/// opened but not committed is aborted by [`UploadSessionWriter::cleanup`].
pub struct UploadSessionWriter<C>
where
    C: MaxComputeClient,
{
    client: C,
    table: TableRef,
    partition: Option<PartitionSpec>,
    config: UploadWriterConfig,
    state: WriterState,
    session: Option<C::Session>,
    block_ids: Vec<BlockId>,
    rows_written: u64,
}

impl<C> UploadSessionWriter<C>
where
    C: MaxComputeClient,
{
    pub fn new(
        client: C,
        table: TableRef,
        partition: Option<PartitionSpec>,
        config: UploadWriterConfig,
    ) -> Self {
        Self {
            client,
            table,
            partition,
            config,
            state: WriterState::Idle,
            session: None,
            block_ids: Vec::new(),
            rows_written: 0,
        }
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(UploadSession::id)
    }

    /// Block ids written so far, in write order.
    pub fn block_ids(&self) -> &[BlockId] {
        &self.block_ids
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Creates the upload session for the table and optional partition.
    pub async fn open(&mut self) -> EtlResult<()> {
        self.expect_state(WriterState::Idle, "open")?;

        if self
            .config
            .tunnel_url
            .as_deref()
            .is_none_or(|url| url.trim().is_empty())
        {
            bail!(
                ErrorKind::SessionCreationFailed,
                "Tunnel endpoint is missing",
                format!("No tunnel url configured to upload into {}", self.table)
            );
        }

        let session = self
            .client
            .create_upload_session(&self.table, self.partition.as_ref())
            .await
            .map_err(|err| {
                etl_error!(
                    ErrorKind::SessionCreationFailed,
                    "Upload session creation failed",
                    format!("Could not create an upload session for {}", self.table),
                    source: err
                )
            })?;

        info!(
            table = %self.table,
            partition = ?self.partition.as_ref().map(ToString::to_string),
            session_id = session.id(),
            "upload session created"
        );

        self.session = Some(session);
        self.state = WriterState::SessionOpen;

        Ok(())
    }

    /// Maps and uploads every row of `source`, then flushes the last block.
    ///
    /// Returns the number of rows written. On failure the writer stays in
    /// [`WriterState::Writing`] and nothing is committed.
    pub async fn write_all<R>(&mut self, source: &mut R, mapper: &FieldMapper) -> EtlResult<u64>
    where
        R: RowSource,
    {
        self.expect_state(WriterState::SessionOpen, "write_all")?;
        self.state = WriterState::Writing;

        let Some(session) = self.session.as_ref() else {
            bail!(
                ErrorKind::InvalidState,
                "Upload session is missing",
                format!("The writer for {} has no session while writing", self.table)
            );
        };

        let mut writer = BufferedBlockWriter::new(
            session,
            &self.table,
            self.config.buffer_size_bytes,
            &self.config.write_policy,
        );

        while let Some(row) = source.next_row().await? {
            let record = mapper.map_row(&row)?;
            writer.append(record).await?;
        }

        let (block_ids, rows_written) = writer.close().await?;

        self.block_ids = block_ids;
        self.rows_written = rows_written;
        self.state = WriterState::Closed;

        info!(
            table = %self.table,
            rows = rows_written,
            blocks = self.block_ids.len(),
            "all rows uploaded"
        );

        Ok(rows_written)
    }

    /// Commits the uploaded blocks. Never retried, a rejected commit ends the task.
    pub async fn commit(&mut self) -> EtlResult<()> {
        self.expect_state(WriterState::Closed, "commit")?;

        #[cfg(feature = "failpoints")]
        etl::failpoints::etl_fail_point(etl::failpoints::UPLOAD_WRITER__BEFORE_COMMIT)?;

        let Some(session) = self.session.as_ref() else {
            bail!(
                ErrorKind::InvalidState,
                "Upload session is missing",
                format!("The writer for {} has no session to commit", self.table)
            );
        };

        let started = Instant::now();
        session.commit(&self.block_ids).await.map_err(|err| {
            etl_error!(
                ErrorKind::CommitFailed,
                "Upload session commit failed",
                format!(
                    "Session {} for {} rejected the commit of {} blocks",
                    session.id(),
                    self.table,
                    self.block_ids.len()
                ),
                source: err
            )
        })?;

        histogram!(ETL_MC_COMMIT_DURATION_SECONDS, "table" => self.table.to_string())
            .record(started.elapsed().as_secs_f64());

        info!(
            table = %self.table,
            session_id = session.id(),
            blocks = self.block_ids.len(),
            rows = self.rows_written,
            "upload session committed"
        );

        self.state = WriterState::Committed;

        Ok(())
    }

    /// Aborts the session, discarding every uploaded block.
    pub async fn abort(&mut self) -> EtlResult<()> {
        if !self.state.has_pending_session() {
            bail!(
                ErrorKind::InvalidState,
                "Upload session cannot be aborted",
                format!("The writer for {} is in state {}", self.table, self.state)
            );
        }

        // The state moves to aborted even when the remote abort fails, the session is never
        // used again.
        self.state = WriterState::Aborted;

        if let Some(session) = self.session.as_ref() {
            info!(table = %self.table, session_id = session.id(), "aborting upload session");
            session.abort().await?;
        }

        Ok(())
    }

    /// Releases the session on every exit path. Aborts an uncommitted session and does nothing
    /// otherwise, so calling it repeatedly is safe.
    pub async fn cleanup(&mut self) -> EtlResult<()> {
        if !self.state.has_pending_session() {
            debug!(table = %self.table, state = %self.state, "nothing to clean up");
            return Ok(());
        }

        self.abort().await
    }

    fn expect_state(&self, expected: WriterState, operation: &str) -> EtlResult<()> {
        if self.state != expected {
            bail!(
                ErrorKind::InvalidState,
                "Upload writer is in the wrong state",
                format!(
                    "Cannot {operation} the writer for {} in state {}, expected {expected}",
                    self.table, self.state
                )
            );
        }

        Ok(())
    }
}

/// Accumulates records and uploads them as numbered blocks.
struct BufferedBlockWriter<'a, S> {
    session: &'a S,
    table: &'a TableRef,
    buffer_size_bytes: usize,
    policy: &'a RetryPolicy,
    buffer: Vec<WireRecord>,
    buffered_bytes: usize,
    next_block_id: BlockId,
    block_ids: Vec<BlockId>,
    rows_written: u64,
}

impl<'a, S> BufferedBlockWriter<'a, S>
where
    S: UploadSession,
{
    fn new(
        session: &'a S,
        table: &'a TableRef,
        buffer_size_bytes: usize,
        policy: &'a RetryPolicy,
    ) -> Self {
        Self {
            session,
            table,
            buffer_size_bytes,
            policy,
            buffer: Vec::new(),
            buffered_bytes: 0,
            next_block_id: 0,
            block_ids: Vec::new(),
            rows_written: 0,
        }
    }

    async fn append(&mut self, record: WireRecord) -> EtlResult<()> {
        self.buffered_bytes = self.buffered_bytes.saturating_add(record.size_hint());
        self.buffer.push(record);

        if self.buffered_bytes >= self.buffer_size_bytes {
            self.flush().await?;
        }

        Ok(())
    }

    /// Flushes the remaining records and returns the written block ids and row count.
    async fn close(mut self) -> EtlResult<(Vec<BlockId>, u64)> {
        if !self.buffer.is_empty() {
            self.flush().await?;
        }

        Ok((self.block_ids, self.rows_written))
    }

    async fn flush(&mut self) -> EtlResult<()> {
        #[cfg(feature = "failpoints")]
        etl::failpoints::etl_fail_point(etl::failpoints::UPLOAD_WRITER__BEFORE_FLUSH)?;

        let block_id = self.next_block_id;
        self.write_block_with_retry(block_id).await?;

        let rows = self.buffer.len() as u64;
        debug!(
            table = %self.table,
            block_id,
            rows,
            bytes = self.buffered_bytes,
            "block flushed"
        );
        counter!(ETL_MC_BLOCKS_FLUSHED_TOTAL, "table" => self.table.to_string()).increment(1);
        counter!(ETL_MC_ROWS_WRITTEN_TOTAL, "table" => self.table.to_string()).increment(rows);

        self.block_ids.push(block_id);
        self.next_block_id += 1;
        self.rows_written += rows;
        self.buffer.clear();
        self.buffered_bytes = 0;

        Ok(())
    }

    /// Uploads the buffer as `block_id`. Retries re-send the same block id so a retried block
    /// replaces any partial upload of the failed attempt.
    async fn write_block_with_retry(&self, block_id: BlockId) -> EtlResult<()> {
        let mut attempt = 0;

        loop {
            match self.session.write_block(block_id, &self.buffer).await {
                Ok(()) => return Ok(()),
                Err(err) if self.policy.has_attempts_left(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        table = %self.table,
                        block_id,
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "block upload failed, retrying"
                    );
                    counter!(ETL_MC_BLOCK_WRITE_RETRIES_TOTAL, "table" => self.table.to_string())
                        .increment(1);

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(etl_error!(
                        ErrorKind::WriteFailed,
                        "Block upload failed",
                        format!(
                            "Block {block_id} of session {} for {} failed after {} attempts",
                            self.session.id(),
                            self.table,
                            attempt + 1
                        ),
                        source: err
                    ));
                }
            }
        }
    }
}
