//! Core data model.
//!
//! A record is one pending outbox row. It is created by the store, handed to
//! the transport under a fresh delivery tag, and deleted only once the
//! downstream party settles that delivery.

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Newtype for outbox record identities. Ordered so stores can keep a
/// high-water read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending outbox record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Unique within the store, stable across reads.
    pub id: RecordId,
    /// Opaque body. The relay never inspects or mutates it.
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(id: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: RecordId(id),
            payload: payload.into(),
        }
    }

    /// Convert into the message handed to the transport.
    pub fn into_message(self) -> OutboundMessage {
        OutboundMessage {
            id: self.id,
            body: self.payload,
            durable: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Correlation token for one delivery on one link. Minted by the publisher,
/// never derived from the record identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryTag(pub u64);

impl std::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "d{}", self.0)
    }
}

/// What goes over the wire. `id` is the record identity so consumers can
/// deduplicate redeliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub id: RecordId,
    pub body: Vec<u8>,
    pub durable: bool,
}

impl OutboundMessage {
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}
