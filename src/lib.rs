//! # outbox-relay
//!
//! Durable outbox relay. Reads pending records from a store, republishes
//! them over a credit-based link, and deletes each one only after the
//! downstream party settles its delivery.
//!
//! Provides the relay core, a Postgres outbox (sqlx), in-memory store and
//! transport collaborators, and OpenTelemetry observability.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod relay;
pub mod store;
pub mod telemetry;
pub mod transport;
