use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

/// Rows mapped and flushed to an upload session.
/// Labels: `table`.
pub const ETL_MC_ROWS_WRITTEN_TOTAL: &str = "etl_mc_rows_written_total";

/// Blocks successfully uploaded to an upload session.
/// Labels: `table`.
pub const ETL_MC_BLOCKS_FLUSHED_TOTAL: &str = "etl_mc_blocks_flushed_total";

/// Block uploads retried after a failed attempt.
/// Labels: `table`.
pub const ETL_MC_BLOCK_WRITE_RETRIES_TOTAL: &str = "etl_mc_block_write_retries_total";

/// Statements retried after a failed attempt.
pub const ETL_MC_STATEMENT_RETRIES_TOTAL: &str = "etl_mc_statement_retries_total";

/// Duration of a session commit.
/// Labels: `table`.
pub const ETL_MC_COMMIT_DURATION_SECONDS: &str = "etl_mc_commit_duration_seconds";

/// Registers MaxCompute metric descriptions. Registration happens only once.
pub fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            ETL_MC_ROWS_WRITTEN_TOTAL,
            Unit::Count,
            "Rows mapped and flushed to MaxCompute upload sessions, labeled by table"
        );

        describe_counter!(
            ETL_MC_BLOCKS_FLUSHED_TOTAL,
            Unit::Count,
            "Blocks uploaded to MaxCompute upload sessions, labeled by table"
        );

        describe_counter!(
            ETL_MC_BLOCK_WRITE_RETRIES_TOTAL,
            Unit::Count,
            "Block uploads retried after a failed attempt, labeled by table"
        );

        describe_counter!(
            ETL_MC_STATEMENT_RETRIES_TOTAL,
            Unit::Count,
            "Partition and truncate statements retried after a failed attempt"
        );

        describe_histogram!(
            ETL_MC_COMMIT_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of MaxCompute upload session commits, labeled by table"
        );
    });
}
