//! Relay span helpers.
//!
//! One span per connection epoch; state transitions are recorded as events
//! inside it.

use tracing::Span;

use crate::transport::Endpoint;

/// Start a span covering one connection epoch.
///
/// The `relay.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_epoch_span(endpoint: &Endpoint, epoch: u64) -> Span {
    tracing::info_span!(
        "relay.epoch",
        "relay.host" = %endpoint.host,
        "relay.address" = %endpoint.address,
        "relay.epoch" = epoch,
        "relay.state" = tracing::field::Empty,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("relay.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
