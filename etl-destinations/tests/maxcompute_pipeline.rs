use etl::error::ErrorKind;
use etl::output::OutputPlugin;
use etl::pipeline::run_output_tasks;
use etl::source::MemoryRowSource;
use etl_destinations::maxcompute::test_utils::{FakeMaxComputeClient, FakeTable, RemoteCall};
use etl_destinations::maxcompute::{MaxComputeOutput, WireValue};
use etl_telemetry::tracing::init_test_tracing;
use serde_json::json;
use std::sync::atomic::Ordering;
use tokio::time::Instant;

use crate::support::maxcompute::{
    maxcompute_config, order_columns, order_rows, order_schemas, table_ref,
};

mod support;

#[tokio::test(start_paused = true)]
async fn writes_rows_into_non_partitioned_table() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    let output = MaxComputeOutput::new(client.clone(), maxcompute_config(json!({})));

    let report = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1, 2, 3])))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.rows_written, 3);
    assert_eq!(report.blocks_committed, 1);
    assert_eq!(report.table.as_deref(), Some("etl_tests.orders"));
    assert!(report.partition.is_none());

    assert_eq!(client.session_count().await, 1);
    assert_eq!(client.commit_count().await, 1);
    assert!(client.submitted_statements().await.is_empty());

    let records = client.committed_records(&table_ref()).await;
    let ids: Vec<_> = records
        .iter()
        .map(|record| record.get("id").cloned())
        .collect();
    assert_eq!(
        ids,
        vec![
            Some(WireValue::Bigint(1)),
            Some(WireValue::Bigint(2)),
            Some(WireValue::Bigint(3)),
        ]
    );
    assert_eq!(
        records[0].get("created_at"),
        Some(&WireValue::Datetime(1_704_067_200_001))
    );
}

#[tokio::test(start_paused = true)]
async fn creates_missing_partition_before_writing() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(
            table_ref(),
            FakeTable::partitioned(&order_columns(), &["pt"]),
        )
        .await;
    let output = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "partition": "pt='20240101'" })),
    );

    let report = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1, 2])))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(report.partition.as_deref(), Some("pt='20240101'"));
    assert_eq!(
        client.submitted_statements().await,
        vec!["ALTER TABLE etl_tests.orders ADD IF NOT EXISTS PARTITION (pt='20240101');"]
    );
    assert!(client.calls().await.contains(&RemoteCall::CreateUploadSession {
        table: "etl_tests.orders".to_string(),
        partition: Some("pt='20240101'".to_string()),
    }));
    assert_eq!(client.partitions(&table_ref()).await, vec!["pt='20240101'"]);
    assert_eq!(client.committed_records(&table_ref()).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn overwrite_drops_partition_before_recreating_it() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(
            table_ref(),
            FakeTable::partitioned(&order_columns(), &["pt"]).with_partition("pt='20240101'"),
        )
        .await;
    let output = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "partition": "pt=20240101", "overwrite": true })),
    );

    let report = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1])))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(
        client.submitted_statements().await,
        vec![
            "ALTER TABLE etl_tests.orders DROP IF EXISTS PARTITION (pt='20240101');",
            "ALTER TABLE etl_tests.orders ADD IF NOT EXISTS PARTITION (pt='20240101');",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn overwrite_matches_partition_keys_case_insensitively() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(
            table_ref(),
            FakeTable::partitioned(&order_columns(), &["pt"]).with_partition("pt='20240101'"),
        )
        .await;
    let output = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "partition": "PT='20240101'", "overwrite": true })),
    );

    let report = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1])))
        .await
        .unwrap();

    assert!(report.success);
    assert_eq!(
        client.submitted_statements().await,
        vec![
            "ALTER TABLE etl_tests.orders DROP IF EXISTS PARTITION (pt='20240101');",
            "ALTER TABLE etl_tests.orders ADD IF NOT EXISTS PARTITION (pt='20240101');",
        ]
    );
    assert_eq!(client.partitions(&table_ref()).await, vec!["pt='20240101'"]);
}

#[tokio::test(start_paused = true)]
async fn partition_value_with_quote_is_rejected_before_remote_calls() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(
            table_ref(),
            FakeTable::partitioned(&order_columns(), &["pt"]),
        )
        .await;
    let output = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "partition": "pt=x'); DROP TABLE etl_tests.orders; --" })),
    );

    let err = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1])))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert!(client.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn overwrite_truncates_non_partitioned_table() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    let first = MaxComputeOutput::new(client.clone(), maxcompute_config(json!({})));
    first
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1, 2])))
        .await
        .unwrap();

    let second = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "overwrite": true })),
    );
    second
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([3])))
        .await
        .unwrap();

    assert_eq!(
        client.submitted_statements().await,
        vec!["TRUNCATE TABLE etl_tests.orders;"]
    );
    let records = client.committed_records(&table_ref()).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].get("id"), Some(&WireValue::Bigint(3)));
}

#[tokio::test(start_paused = true)]
async fn block_write_is_retried_until_it_succeeds() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    client.fail_next_block_writes(2).await;
    let output = MaxComputeOutput::new(client.clone(), maxcompute_config(json!({})));
    let start = Instant::now();

    let report = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1, 2, 3])))
        .await
        .unwrap();

    assert!(report.success);
    let block_writes = client
        .calls()
        .await
        .into_iter()
        .filter(|call| matches!(call, RemoteCall::WriteBlock { .. }))
        .count();
    assert_eq!(block_writes, 3);
    assert_eq!(client.commit_count().await, 1);
    assert_eq!(client.committed_records(&table_ref()).await.len(), 3);
    // 1s after the first failure and 2s after the second.
    assert_eq!(start.elapsed().as_secs(), 3);
}

#[tokio::test(start_paused = true)]
async fn partition_on_non_partitioned_table_is_rejected_before_any_session() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    let output = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "partition": "pt='20240101'", "overwrite": true })),
    );
    let source = MemoryRowSource::new(order_rows([1]));
    let closed = source.closed_flag();

    let err = output
        .run_task(0, &order_schemas(), source)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(client.session_count().await, 0);
    assert!(client.submitted_statements().await.is_empty());
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn unknown_partition_key_is_rejected() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(
            table_ref(),
            FakeTable::partitioned(&order_columns(), &["pt"]),
        )
        .await;
    let output = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "partition": "ds='20240101'" })),
    );

    let err = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1])))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert!(client.submitted_statements().await.is_empty());
    assert_eq!(client.session_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn missing_table_is_a_config_error() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    let output = MaxComputeOutput::new(client.clone(), maxcompute_config(json!({})));

    let err = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1])))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(client.session_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_configuration_fails_before_remote_calls() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    let output = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "access_key_id": "" })),
    );

    let err = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1])))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert!(client.calls().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn column_mapping_renames_fields() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(
            table_ref(),
            FakeTable::new(&["id", "customer_name", "paid", "amount", "created_at"]),
        )
        .await;
    let output = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "column_mapping": { "customer": "customer_name" } })),
    );

    output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([4])))
        .await
        .unwrap();

    let records = client.committed_records(&table_ref()).await;
    assert_eq!(
        records[0].get("customer_name"),
        Some(&WireValue::String("customer-4".to_string()))
    );
    assert!(records[0].get("customer").is_none());
}

#[tokio::test(start_paused = true)]
async fn mapping_onto_unknown_column_is_rejected() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    let output = MaxComputeOutput::new(
        client.clone(),
        maxcompute_config(json!({ "column_mapping": { "customer": "buyer" } })),
    );

    let err = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1])))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
    assert_eq!(client.session_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn failing_source_aborts_the_session() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    let output = MaxComputeOutput::new(client.clone(), maxcompute_config(json!({})));
    let source = MemoryRowSource::new(order_rows([1, 2, 3])).fail_after(2);
    let closed = source.closed_flag();

    let err = output
        .run_task(0, &order_schemas(), source)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert_eq!(client.commit_count().await, 0);
    assert_eq!(client.abort_count().await, 1);
    assert!(client.committed_records(&table_ref()).await.is_empty());
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn session_creation_failure_is_reported() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    client.fail_session_creation(true).await;
    let output = MaxComputeOutput::new(client.clone(), maxcompute_config(json!({})));

    let err = output
        .run_task(0, &order_schemas(), MemoryRowSource::new(order_rows([1])))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SessionCreationFailed);
    assert_eq!(client.abort_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_tasks_are_isolated() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    let output = MaxComputeOutput::new(client.clone(), maxcompute_config(json!({})));
    let sources = vec![
        MemoryRowSource::new(order_rows([1, 2])),
        MemoryRowSource::new(order_rows([3, 4])).fail_after(1),
        MemoryRowSource::new(order_rows([5, 6, 7])),
    ];

    let reports = run_output_tasks(output, order_schemas(), sources).await;

    assert!(reports[0].success);
    assert!(reports[1].failed_with(ErrorKind::InvalidData));
    assert_eq!(reports[1].table.as_deref(), Some("etl_tests.orders"));
    assert!(reports[1].solution.is_some());
    assert!(reports[2].success);
    assert_eq!(reports[2].rows_written, 3);

    assert_eq!(client.session_count().await, 3);
    assert_eq!(client.commit_count().await, 2);
    assert_eq!(client.committed_records(&table_ref()).await.len(), 5);
}

#[tokio::test]
async fn resume_is_not_supported() {
    let output = MaxComputeOutput::new(FakeMaxComputeClient::new(), maxcompute_config(json!({})));

    assert_eq!(output.resume().unwrap_err().kind(), ErrorKind::ConfigError);
}

#[tokio::test(start_paused = true)]
async fn failed_abort_is_reported_with_the_task_error() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    client.fail_aborts(true).await;
    let output = MaxComputeOutput::new(client.clone(), maxcompute_config(json!({})));
    let source = MemoryRowSource::new(order_rows([1, 2])).fail_after(1);

    let err = output
        .run_task(0, &order_schemas(), source)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert_eq!(
        err.kinds(),
        vec![ErrorKind::InvalidData, ErrorKind::DestinationConnectionFailed]
    );
    assert_eq!(client.abort_count().await, 1);
    assert_eq!(client.commit_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn client_failures_reach_the_task_report() {
    init_test_tracing();

    let client = FakeMaxComputeClient::new();
    client
        .add_table(table_ref(), FakeTable::new(&order_columns()))
        .await;
    client
        .fail_metadata(Some(ErrorKind::AuthenticationError))
        .await;
    let output = MaxComputeOutput::new(client.clone(), maxcompute_config(json!({})));

    let reports = run_output_tasks(
        output,
        order_schemas(),
        vec![MemoryRowSource::new(order_rows([1]))],
    )
    .await;

    assert!(reports[0].failed_with(ErrorKind::AuthenticationError));
    assert_eq!(
        reports[0].solution,
        Some("Verify the access key id and secret and their permissions on the project.")
    );
    assert_eq!(client.session_count().await, 0);
}
