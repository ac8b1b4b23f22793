//! Integration tests for telemetry initialization and span helpers.

use outbox_relay::telemetry::relay::{record_state_transition, start_epoch_span};
use outbox_relay::transport::Endpoint;

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = outbox_relay::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "outbox-relay-test".to_string(),
        log_level: "debug".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = outbox_relay::telemetry::init_telemetry(config);
}

#[test]
fn epoch_span_creates_and_records_transition() {
    let endpoint = Endpoint::new("localhost:5672", "examples");
    let span = start_epoch_span(&endpoint, 1);
    record_state_transition(&span, "connecting", "active");
    record_state_transition(&span, "active", "disconnected");
}

#[test]
fn counters_accept_labels_without_a_provider() {
    use opentelemetry::KeyValue;
    use outbox_relay::telemetry::metrics;

    metrics::records_sent().add(1, &[KeyValue::new("address", "examples")]);
    metrics::store_operations().add(1, &[KeyValue::new("operation", "load")]);
    metrics::rechecks().add(1, &[]);
}
