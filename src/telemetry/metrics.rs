//! Metric instrument factories for outbox-relay.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"outbox-relay"` meter.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for outbox-relay instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("outbox-relay")
}

/// Counter: records handed to the transport.
/// Labels: `address`.
pub fn records_sent() -> Counter<u64> {
    meter()
        .u64_counter("relay.records.sent")
        .with_description("Number of records sent to the downstream link")
        .build()
}

/// Counter: settlements that deleted a record.
/// Labels: `address`.
pub fn records_settled() -> Counter<u64> {
    meter()
        .u64_counter("relay.records.settled")
        .with_description("Number of records settled and removed from the outbox")
        .build()
}

/// Counter: unsettled deliveries discarded on link loss.
pub fn deliveries_discarded() -> Counter<u64> {
    meter()
        .u64_counter("relay.deliveries.discarded")
        .with_description("Number of in-flight deliveries discarded on disconnect")
        .build()
}

/// Counter: store operations (load, load_empty, delete, reset, enqueue).
/// Labels: `operation`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("relay.store.operations")
        .with_description("Number of outbox store operations")
        .build()
}

/// Counter: connection attempts.
/// Labels: `result` ("ok" | "error").
pub fn connections() -> Counter<u64> {
    meter()
        .u64_counter("relay.connections")
        .with_description("Number of transport connection attempts")
        .build()
}

/// Counter: recheck timers that fired and re-probed the store.
pub fn rechecks() -> Counter<u64> {
    meter()
        .u64_counter("relay.rechecks")
        .with_description("Number of empty-store rechecks")
        .build()
}
