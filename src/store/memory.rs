//! In-memory outbox store.
//!
//! Backs tests and local runs. Keeps the same cursor semantics as the
//! Postgres store: a high-water mark on record id, cleared by `reset`.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::OutboxStore;
use crate::error::{Error, Result};
use crate::model::{Record, RecordId};

/// Call counters, for asserting how the relay drove the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreCalls {
    pub loads: usize,
    pub deletes: usize,
    pub resets: usize,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<RecordId, Vec<u8>>,
    cursor: Option<RecordId>,
    next_id: i64,
    calls: StoreCalls,
    failing_loads: usize,
    failing_deletes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `(id, payload)` rows.
    pub fn with_records<I, P>(rows: I) -> Self
    where
        I: IntoIterator<Item = (i64, P)>,
        P: Into<Vec<u8>>,
    {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.lock() {
            for (id, payload) in rows {
                inner.records.insert(RecordId(id), payload.into());
                inner.next_id = inner.next_id.max(id);
            }
        }
        store
    }

    /// Append a record with the next free id.
    pub fn insert(&self, payload: impl Into<Vec<u8>>) -> Result<RecordId> {
        let mut inner = self.lock("insert")?;
        inner.next_id += 1;
        let id = RecordId(inner.next_id);
        inner.records.insert(id, payload.into());
        Ok(id)
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.lock("contains")
            .map(|inner| inner.records.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.lock("len").map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.lock("ids")
            .map(|inner| inner.records.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> StoreCalls {
        self.lock("calls").map(|inner| inner.calls).unwrap_or_default()
    }

    /// Make the next `n` loads fail with a storage error.
    pub fn fail_next_loads(&self, n: usize) {
        if let Ok(mut inner) = self.lock("fail_next_loads") {
            inner.failing_loads = n;
        }
    }

    /// Make the next `n` deletes fail with a storage error.
    pub fn fail_next_deletes(&self, n: usize) {
        if let Ok(mut inner) = self.lock("fail_next_deletes") {
            inner.failing_deletes = n;
        }
    }

    fn lock(&self, operation: &'static str) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| Error::LockPoisoned(operation))
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn load(&self, max: usize) -> Result<Vec<Record>> {
        let mut inner = self.lock("load")?;
        inner.calls.loads += 1;

        if inner.failing_loads > 0 {
            inner.failing_loads -= 1;
            return Err(Error::Other("injected load failure".to_string()));
        }

        let cursor = inner.cursor;
        let records: Vec<Record> = inner
            .records
            .iter()
            .filter(|(id, _)| cursor.is_none_or(|cursor| **id > cursor))
            .take(max)
            .map(|(id, payload)| Record {
                id: *id,
                payload: payload.clone(),
            })
            .collect();

        if let Some(last) = records.last() {
            inner.cursor = Some(last.id);
        }
        Ok(records)
    }

    async fn delete(&self, id: RecordId) -> Result<()> {
        let mut inner = self.lock("delete")?;
        inner.calls.deletes += 1;
        if inner.failing_deletes > 0 {
            inner.failing_deletes -= 1;
            return Err(Error::Other("injected delete failure".to_string()));
        }
        inner.records.remove(&id);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut inner = self.lock("reset")?;
        inner.calls.resets += 1;
        inner.cursor = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().map(|r| r.id.0).collect()
    }

    #[tokio::test]
    async fn load_respects_max_and_cursor() {
        let store = MemoryStore::with_records([(1, "a"), (2, "b"), (3, "c")]);

        let first = store.load(2).await.unwrap();
        assert_eq!(ids(&first), vec![1, 2]);

        let second = store.load(2).await.unwrap();
        assert_eq!(ids(&second), vec![3]);

        assert!(store.load(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_redispatches_unsettled_records() {
        let store = MemoryStore::with_records([(1, "a"), (2, "b")]);
        store.load(10).await.unwrap();
        store.delete(RecordId(1)).await.unwrap();

        store.reset().await.unwrap();
        let again = store.load(10).await.unwrap();
        assert_eq!(ids(&again), vec![2]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::with_records([(1, "a"), (2, "b")]);
        store.delete(RecordId(1)).await.unwrap();
        store.delete(RecordId(1)).await.unwrap();
        store.delete(RecordId(99)).await.unwrap();
        assert_eq!(store.ids(), vec![RecordId(2)]);
        assert_eq!(store.calls().deletes, 3);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::with_records([(1, "a")]);
        store.fail_next_loads(1);
        assert!(store.load(1).await.is_err());
        assert_eq!(store.load(1).await.unwrap().len(), 1);

        store.fail_next_deletes(1);
        assert!(store.delete(RecordId(1)).await.is_err());
        assert!(store.contains(RecordId(1)));
        store.delete(RecordId(1)).await.unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn insert_continues_after_seeded_ids() {
        let store = MemoryStore::with_records([(5, "x")]);
        assert_eq!(store.insert("y").unwrap(), RecordId(6));
        assert_eq!(store.len(), 2);
    }
}
