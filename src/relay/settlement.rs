//! Settlement tracker: the only component allowed to delete from the store.
//!
//! Every delivery handed to the link is recorded here under its tag. A
//! settlement for a known tag deletes the matching record; link loss
//! discards all entries and resets the store cursor so the records are read
//! again on the next connection.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{DeliveryTag, RecordId};
use crate::store::OutboxStore;

/// What a settlement did to the store.
#[derive(Debug)]
pub enum Settlement {
    Deleted(RecordId),
    /// The delivery was known but its record could not be deleted. The
    /// record is still in the store and the tag is forgotten.
    DeleteFailed(RecordId, Error),
    /// Unknown or repeated tag.
    Ignored,
}

#[derive(Debug, Default)]
pub struct SettlementTracker {
    pending: HashMap<DeliveryTag, RecordId>,
}

impl SettlementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `tag` carries record `id`.
    pub fn track(&mut self, tag: DeliveryTag, id: RecordId) {
        self.pending.insert(tag, id);
    }

    /// Deliveries sent on the current link and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, tag: DeliveryTag) -> bool {
        self.pending.contains_key(&tag)
    }

    /// Handle a settlement. Deletes the record for a known tag; unknown or
    /// repeated tags are ignored.
    ///
    /// The entry is removed before the delete is attempted. On failure the
    /// caller owns retrying the delete.
    pub async fn on_settled<S>(&mut self, tag: DeliveryTag, store: &S) -> Settlement
    where
        S: OutboxStore + ?Sized,
    {
        let Some(id) = self.pending.remove(&tag) else {
            debug!(%tag, "ignoring settlement for unknown delivery");
            return Settlement::Ignored;
        };
        match store.delete(id).await {
            Ok(()) => Settlement::Deleted(id),
            Err(e) => Settlement::DeleteFailed(id, e),
        }
    }

    /// Handle link loss: forget every unsettled delivery without deleting
    /// anything, then reset the store cursor. Returns how many deliveries
    /// were discarded.
    pub async fn on_disconnected<S>(&mut self, store: &S) -> Result<usize>
    where
        S: OutboxStore + ?Sized,
    {
        let discarded = self.pending.len();
        self.pending.clear();
        store.reset().await?;
        Ok(discarded)
    }
}
