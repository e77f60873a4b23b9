#![allow(dead_code)]

use etl::types::{Cell, ColumnSchema, LogicalType, TableRow};
use etl_config::shared::MaxComputeConfig;
use etl_destinations::maxcompute::TableRef;

pub const PROJECT: &str = "etl_tests";
pub const TABLE: &str = "orders";

pub fn table_ref() -> TableRef {
    TableRef::new(PROJECT, TABLE)
}

/// Builds a config pointing at [`PROJECT`].[`TABLE`] with the given overrides applied as JSON.
pub fn maxcompute_config(overrides: serde_json::Value) -> MaxComputeConfig {
    let mut config = serde_json::json!({
        "access_key_id": "test-id",
        "access_key_secret": "test-secret",
        "project_name": PROJECT,
        "table_name": TABLE,
        "statement_poll_interval_ms": 1000,
        "statement_retry": {
            "max_attempts": 3,
            "initial_delay_ms": 1000,
            "backoff": "exponential"
        },
        "write_retry": {
            "max_attempts": 3,
            "initial_delay_ms": 1000,
            "backoff": "exponential"
        }
    });

    if let (Some(config), Some(overrides)) = (config.as_object_mut(), overrides.as_object()) {
        for (key, value) in overrides {
            config.insert(key.clone(), value.clone());
        }
    }

    serde_json::from_value(config).expect("valid maxcompute config")
}

pub fn order_schemas() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema::new("id", LogicalType::Long),
        ColumnSchema::new("customer", LogicalType::String),
        ColumnSchema::new("paid", LogicalType::Boolean),
        ColumnSchema::new("amount", LogicalType::Double),
        ColumnSchema::new("created_at", LogicalType::Timestamp),
    ]
}

/// Destination columns matching [`order_schemas`].
pub fn order_columns() -> Vec<&'static str> {
    vec!["id", "customer", "paid", "amount", "created_at"]
}

pub fn order_row(id: i64) -> TableRow {
    TableRow::new(vec![
        Cell::I64(id),
        Cell::String(format!("customer-{id}")),
        Cell::Bool(id % 2 == 0),
        Cell::F64(id as f64 * 1.5),
        Cell::Timestamp(
            chrono::DateTime::from_timestamp_millis(1_704_067_200_000 + id)
                .expect("valid timestamp"),
        ),
    ])
}

pub fn order_rows(ids: impl IntoIterator<Item = i64>) -> Vec<TableRow> {
    ids.into_iter().map(order_row).collect()
}
