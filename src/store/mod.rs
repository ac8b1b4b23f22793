//! Store adapter: the persistent queue of pending outbox records.
//!
//! The relay only ever talks to a store through [`OutboxStore`]. A store owns
//! its read cursor: records returned by `load` count as dispatched for the
//! current epoch and are not returned again until `reset`.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::model::{Record, RecordId};
use async_trait::async_trait;

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Fetch up to `max` records not yet dispatched in this epoch, in id
    /// order. An empty result means nothing is pending right now.
    ///
    /// Implementations must update their cursor only after their last await
    /// point, so a dropped `load` future dispatches nothing.
    async fn load(&self, max: usize) -> Result<Vec<Record>>;

    /// Permanently remove a record. Unknown or already-deleted ids are a no-op.
    async fn delete(&self, id: RecordId) -> Result<()>;

    /// Forget what was dispatched, so the next `load` re-reads every record
    /// still present.
    async fn reset(&self) -> Result<()>;
}
