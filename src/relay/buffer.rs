//! Bounded prefetch buffer between the store and the transport.

use std::collections::VecDeque;

use crate::model::Record;

/// FIFO of loaded-but-unsent records. Never holds more than `capacity`.
#[derive(Debug)]
pub struct PrefetchBuffer {
    records: VecDeque<Record>,
    capacity: usize,
}

impl PrefetchBuffer {
    /// A zero capacity is bumped to one so the relay can always make progress.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, handing it back when the buffer is full.
    pub fn try_push(&mut self, record: Record) -> Result<(), Record> {
        if self.is_full() {
            return Err(record);
        }
        self.records.push_back(record);
        Ok(())
    }

    pub fn try_pop(&mut self) -> Option<Record> {
        self.records.pop_front()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Room left before the buffer is full.
    pub fn vacancy(&self) -> usize {
        self.capacity - self.records.len()
    }

    /// Drop everything buffered. Returns how many records were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.records.len();
        self.records.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_fails_when_full() {
        let mut buffer = PrefetchBuffer::new(2);
        buffer.try_push(Record::new(1, "a")).unwrap();
        buffer.try_push(Record::new(2, "b")).unwrap();
        assert!(buffer.is_full());
        assert_eq!(buffer.vacancy(), 0);

        let rejected = buffer.try_push(Record::new(3, "c")).unwrap_err();
        assert_eq!(rejected.id.0, 3);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn pops_in_load_order() {
        let mut buffer = PrefetchBuffer::new(4);
        for id in 1..=3 {
            buffer.try_push(Record::new(id, "x")).unwrap();
        }
        let order: Vec<i64> = std::iter::from_fn(|| buffer.try_pop()).map(|r| r.id.0).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(buffer.try_pop().is_none());
    }

    #[test]
    fn zero_capacity_is_bumped() {
        let buffer = PrefetchBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.vacancy(), 1);
    }

    #[test]
    fn clear_reports_dropped() {
        let mut buffer = PrefetchBuffer::new(3);
        buffer.try_push(Record::new(1, "a")).unwrap();
        buffer.try_push(Record::new(2, "b")).unwrap();
        assert_eq!(buffer.clear(), 2);
        assert!(buffer.is_empty());
    }
}
