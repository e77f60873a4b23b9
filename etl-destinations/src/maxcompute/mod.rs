//! Bulk output into MaxCompute tables through the upload tunnel.

mod client;
mod core;
mod encoding;
mod metrics;
mod partition;
mod statement;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
mod validation;
mod writer;

pub use client::{
    BlockId, MaxComputeClient, RemoteTableSchema, StatementHandle, StatementStatus, TableRef,
    UploadSession,
};
pub use core::MaxComputeOutput;
pub use encoding::{FieldMapper, WireRecord, WireValue, map_row};
pub use partition::{PartitionManager, PartitionSpec};
pub use statement::{StatementRunner, generate_task_name};
pub use writer::{UploadSessionWriter, UploadWriterConfig, WriterState};
