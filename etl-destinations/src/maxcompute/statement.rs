use etl::error::{ErrorKind, EtlResult};
use etl::etl_error;
use etl::retry::RetryPolicy;
use metrics::counter;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::maxcompute::client::{MaxComputeClient, StatementStatus};
use crate::maxcompute::metrics::ETL_MC_STATEMENT_RETRIES_TOTAL;

/// Prefix of the task name every statement is submitted under.
const TASK_NAME_PREFIX: &str = "etl_task_";

/// Returns a unique task name, e.g. `etl_task_67e55044_10b1_426f_9247_bb680e5fe0c8`.
pub fn generate_task_name() -> String {
    format!(
        "{TASK_NAME_PREFIX}{}",
        Uuid::new_v4().to_string().replace('-', "_")
    )
}

/// Runs DDL statements as remote tasks and waits for their outcome.
#[derive(Debug, Clone)]
pub struct StatementRunner<C> {
    client: C,
    poll_interval: Duration,
}

impl<C> StatementRunner<C>
where
    C: MaxComputeClient,
{
    pub fn new(client: C, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Submits `statement` and polls until it reaches a terminal status.
    ///
    /// Blank statements are skipped without contacting the service. Every non-success outcome,
    /// including submit and poll failures, is reported as [`ErrorKind::StatementFailed`].
    pub async fn run(&self, statement: &str) -> EtlResult<()> {
        let statement = statement.trim();
        if statement.is_empty() {
            debug!("skipping blank statement");
            return Ok(());
        }

        let task_name = generate_task_name();
        info!(%task_name, statement, "submitting statement");

        let handle = self
            .client
            .submit_statement(statement, &task_name)
            .await
            .map_err(|err| {
                etl_error!(
                    ErrorKind::StatementFailed,
                    "Statement submission failed",
                    format!("Could not submit '{statement}' as task {task_name}"),
                    source: err
                )
            })?;

        loop {
            let status = self.client.poll_statement(&handle).await.map_err(|err| {
                etl_error!(
                    ErrorKind::StatementFailed,
                    "Statement status poll failed",
                    format!("Could not poll the status of task {task_name} ({handle})"),
                    source: err
                )
            })?;

            match status {
                StatementStatus::Running => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                StatementStatus::Success => {
                    info!(%task_name, "statement succeeded");
                    return Ok(());
                }
                StatementStatus::Failed(message) => {
                    return Err(etl_error!(
                        ErrorKind::StatementFailed,
                        "Statement failed",
                        format!("Task {task_name} running '{statement}' failed: {message}")
                    ));
                }
                StatementStatus::Cancelled => {
                    return Err(etl_error!(
                        ErrorKind::StatementFailed,
                        "Statement was cancelled",
                        format!("Task {task_name} running '{statement}' was cancelled")
                    ));
                }
            }
        }
    }

    /// Runs `statement`, retrying failures while `policy` has attempts left.
    ///
    /// Only [`ErrorKind::StatementFailed`] errors are retried. The last error is returned once the
    /// attempt budget is spent, so the statement is submitted at most `policy.max_attempts` times.
    pub async fn run_with_retry(&self, statement: &str, policy: &RetryPolicy) -> EtlResult<()> {
        let mut attempt = 0;

        loop {
            match self.run(statement).await {
                Ok(()) => return Ok(()),
                Err(err)
                    if err.kind() == ErrorKind::StatementFailed
                        && policy.has_attempts_left(attempt) =>
                {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "statement failed, retrying"
                    );
                    counter!(ETL_MC_STATEMENT_RETRIES_TOTAL).increment(1);

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maxcompute::client::TableRef;
    use crate::maxcompute::test_utils::{FakeMaxComputeClient, FakeTable, RemoteCall};
    use etl::retry::BackoffKind;
    use tokio::time::Instant;

    async fn client_with_table() -> FakeMaxComputeClient {
        let client = FakeMaxComputeClient::new();
        client
            .add_table(TableRef::new("p", "t"), FakeTable::new(&["id"]))
            .await;

        client
    }

    fn runner(client: &FakeMaxComputeClient) -> StatementRunner<FakeMaxComputeClient> {
        StatementRunner::new(client.clone(), Duration::from_secs(1))
    }

    #[test]
    fn task_names_are_unique_and_prefixed() {
        let first = generate_task_name();
        let second = generate_task_name();

        assert!(first.starts_with("etl_task_"));
        assert!(!first.contains('-'));
        assert_ne!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_statement_is_skipped() {
        let client = FakeMaxComputeClient::new();

        runner(&client).run("   ").await.unwrap();

        assert!(client.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_terminal_status() {
        let client = client_with_table().await;
        client.set_running_polls(2).await;
        let start = Instant::now();

        runner(&client).run("truncate table p.t;").await.unwrap();

        let polls = client
            .calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, RemoteCall::PollStatement(_)))
            .count();
        assert_eq!(polls, 3);
        assert_eq!(start.elapsed().as_secs(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_statement_is_reported() {
        let client = client_with_table().await;
        client.fail_next_statements(1).await;

        let err = runner(&client).run("truncate table p.t;").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StatementFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let client = client_with_table().await;
        client.fail_next_statements(2).await;
        let policy = RetryPolicy::statement_default();
        let start = Instant::now();

        runner(&client)
            .run_with_retry("truncate table p.t;", &policy)
            .await
            .unwrap();

        assert_eq!(client.submitted_statements().await.len(), 3);
        // 1s after the first failure, 2s after the second.
        assert_eq!(start.elapsed().as_secs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_attempts() {
        let client = client_with_table().await;
        client.fail_next_statements(10).await;
        let policy = RetryPolicy::new(3, Duration::from_millis(500), BackoffKind::Fixed);
        let start = Instant::now();

        let err = runner(&client)
            .run_with_retry("truncate table p.t;", &policy)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StatementFailed);
        assert_eq!(client.submitted_statements().await.len(), 3);
        assert_eq!(start.elapsed().as_secs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_sleeps() {
        let client = client_with_table().await;
        client.fail_next_statements(1).await;
        let policy = RetryPolicy::new(1, Duration::from_secs(5), BackoffKind::Exponential);
        let start = Instant::now();

        assert!(
            runner(&client)
                .run_with_retry("truncate table p.t;", &policy)
                .await
                .is_err()
        );
        assert_eq!(start.elapsed().as_secs(), 0);
    }
}
