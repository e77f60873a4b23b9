use etl_telemetry::tracing::{TracingError, init_tracing};

#[test]
fn installs_global_subscriber_once() {
    let flusher = init_tracing("etl-telemetry-tests").unwrap();
    tracing::info!("logged through the installed subscriber");

    let err = init_tracing("etl-telemetry-tests").err();
    assert!(matches!(err, Some(TracingError::LogBridge(_))));

    drop(flusher);
}
