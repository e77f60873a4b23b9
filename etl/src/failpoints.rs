//! Named fault injection points in the upload path, active with the `failpoints` feature.

use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};

/// Fires before an upload session commits its blocks.
pub const UPLOAD_WRITER__BEFORE_COMMIT: &str = "upload_writer.before_commit";
/// Fires before each buffered block is uploaded.
pub const UPLOAD_WRITER__BEFORE_FLUSH: &str = "upload_writer.before_flush";
/// Fires once the destination partition is ready and before the session is opened.
pub const ORCHESTRATOR__AFTER_PARTITION_PREPARED: &str = "orchestrator.after_partition_prepared";

/// Fails the upload step at `name` when that failpoint is configured with `return`.
///
/// `return(write_failed)` yields an [`ErrorKind::WriteFailed`] error, which the task reports
/// like a failed block upload. Any other `return` yields [`ErrorKind::WithNoRetry`].
pub fn etl_fail_point(name: &str) -> EtlResult<()> {
    fail_point!(name, |parameter| {
        let error_kind = match parameter.as_deref() {
            Some("write_failed") => ErrorKind::WriteFailed,
            _ => ErrorKind::WithNoRetry,
        };

        bail!(
            error_kind,
            "Injected upload failure",
            format!("Failpoint '{name}' aborted the upload step")
        );
    });

    Ok(())
}
