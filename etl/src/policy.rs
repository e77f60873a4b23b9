use crate::error::{ErrorKind, EtlError};

/// Retry behavior for a classified error.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryDirective {
    /// The operation already retried internally and may be retried again by the host.
    Timed,
    /// The task should only be rerun after manual intervention.
    Manual,
    /// The task should not be rerun.
    NoRetry,
}

/// Policy describing how an [`EtlError`] that ended an output task should be handled.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ErrorHandlingPolicy {
    retry_directive: RetryDirective,
    solution: Option<&'static str>,
}

impl ErrorHandlingPolicy {
    const fn new(retry_directive: RetryDirective, solution: Option<&'static str>) -> Self {
        Self {
            retry_directive,
            solution,
        }
    }

    pub fn retry_directive(&self) -> RetryDirective {
        self.retry_directive
    }

    /// Returns an optional operator-facing solution message.
    pub fn solution(&self) -> Option<&'static str> {
        self.solution
    }
}

/// Builds an [`ErrorHandlingPolicy`] from an [`EtlError`] so that task failures are reported in
/// a unified way.
pub fn build_error_handling_policy(error: &EtlError) -> ErrorHandlingPolicy {
    match error.kind() {
        // Transient remote failures that survived the internal retry budget.
        ErrorKind::DestinationConnectionFailed
        | ErrorKind::StatementFailed
        | ErrorKind::WriteFailed => ErrorHandlingPolicy::new(
            RetryDirective::Timed,
            Some("Rerun the task once the MaxCompute service is reachable again."),
        ),

        ErrorKind::ConfigError => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Fix the output configuration and rerun the task."),
        ),
        ErrorKind::AuthenticationError => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Verify the access key id and secret and their permissions on the project."),
        ),
        ErrorKind::PartitionError => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Check the partition setting against the partition columns of the table."),
        ),
        ErrorKind::ConversionError | ErrorKind::InvalidData => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some("Make sure the incoming rows match the declared column types."),
        ),
        ErrorKind::CommitFailed => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some(
                "The upload was not committed and no rows are visible. Check the session state before rerunning.",
            ),
        ),

        // Special handling for fault injection tests.
        #[cfg(feature = "failpoints")]
        ErrorKind::WithNoRetry => {
            ErrorHandlingPolicy::new(RetryDirective::NoRetry, Some("Cannot retry this error."))
        }

        _ => ErrorHandlingPolicy::new(
            RetryDirective::Manual,
            Some(
                "There is no single prescribed solution for this error. Inspect the error detail and rerun the task after a targeted fix.",
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn err(kind: ErrorKind) -> EtlError {
        EtlError::from((kind, "test error"))
    }

    #[test]
    fn classifies_statement_failure_as_timed_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::StatementFailed));
        assert_eq!(policy.retry_directive(), RetryDirective::Timed);
        assert!(policy.solution().is_some());
    }

    #[test]
    fn classifies_config_error_as_manual_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::ConfigError));
        assert_eq!(policy.retry_directive(), RetryDirective::Manual);
        assert_eq!(
            policy.solution(),
            Some("Fix the output configuration and rerun the task.")
        );
    }

    #[test]
    fn classifies_client_failures() {
        let connection = build_error_handling_policy(&err(ErrorKind::DestinationConnectionFailed));
        assert_eq!(connection.retry_directive(), RetryDirective::Timed);

        let auth = build_error_handling_policy(&err(ErrorKind::AuthenticationError));
        assert_eq!(auth.retry_directive(), RetryDirective::Manual);
        assert_eq!(
            auth.solution(),
            Some("Verify the access key id and secret and their permissions on the project.")
        );
    }

    #[test]
    fn classifies_unlisted_kind_as_manual_retry() {
        let policy = build_error_handling_policy(&err(ErrorKind::InvalidState));
        assert_eq!(policy.retry_directive(), RetryDirective::Manual);
        assert!(policy.solution().is_some());
    }
}
