//! Flow-controlled publisher: moves records from the prefetch buffer onto the
//! link, one per unit of credit.

use tracing::debug;

use super::buffer::PrefetchBuffer;
use super::settlement::SettlementTracker;
use crate::error::Result;
use crate::model::DeliveryTag;
use crate::transport::Link;

#[derive(Debug, Default)]
pub struct Publisher {
    credit: u32,
    sent: u64,
    next_tag: u64,
}

impl Publisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit granted by the peer and not yet spent.
    pub fn credit(&self) -> u32 {
        self.credit
    }

    /// Total sends across every epoch. Never decreases.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn on_credit(&mut self, amount: u32) {
        self.credit = self.credit.saturating_add(amount);
    }

    /// Forget unspent credit. A new link grants its own.
    pub fn reset_credit(&mut self) {
        self.credit = 0;
    }

    fn fresh_tag(&mut self) -> DeliveryTag {
        self.next_tag += 1;
        DeliveryTag(self.next_tag)
    }

    /// Send buffered records while credit lasts, recording each delivery with
    /// the tracker. Returns how many records were sent.
    ///
    /// A send error aborts the drain. The popped record stays in the store
    /// and is read again after the next reset.
    pub fn drain<L>(
        &mut self,
        buffer: &mut PrefetchBuffer,
        link: &mut L,
        tracker: &mut SettlementTracker,
    ) -> Result<usize>
    where
        L: Link + ?Sized,
    {
        let mut count = 0;
        while self.credit > 0 {
            let Some(record) = buffer.try_pop() else {
                break;
            };
            let tag = self.fresh_tag();
            let id = record.id;
            link.send(tag, record.into_message())?;
            tracker.track(tag, id);
            self.credit -= 1;
            self.sent += 1;
            count += 1;
            debug!(record_id = %id, %tag, "sent record");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::model::{OutboundMessage, Record, RecordId};

    /// Link that accepts everything and counts what it saw.
    #[derive(Default)]
    struct CountingLink {
        sent: Vec<(DeliveryTag, RecordId)>,
        fail: bool,
    }

    impl Link for CountingLink {
        fn credit(&self) -> u32 {
            u32::MAX
        }

        fn send(&mut self, tag: DeliveryTag, message: OutboundMessage) -> Result<()> {
            if self.fail {
                return Err(Error::Transport("boom".to_string()));
            }
            self.sent.push((tag, message.id));
            Ok(())
        }

        fn close(&mut self) {}
    }

    fn buffer_with(ids: &[i64]) -> PrefetchBuffer {
        let mut buffer = PrefetchBuffer::new(10);
        for id in ids {
            buffer.try_push(Record::new(*id, "x")).unwrap();
        }
        buffer
    }

    #[test]
    fn sends_nothing_without_credit() {
        let mut publisher = Publisher::new();
        let mut buffer = buffer_with(&[1, 2, 3]);
        let mut link = CountingLink::default();
        let mut tracker = SettlementTracker::new();

        let sent = publisher.drain(&mut buffer, &mut link, &mut tracker).unwrap();
        assert_eq!(sent, 0);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn sends_at_most_granted_credit() {
        let mut publisher = Publisher::new();
        let mut buffer = buffer_with(&[1, 2, 3]);
        let mut link = CountingLink::default();
        let mut tracker = SettlementTracker::new();

        publisher.on_credit(2);
        assert_eq!(publisher.drain(&mut buffer, &mut link, &mut tracker).unwrap(), 2);
        assert_eq!(publisher.credit(), 0);
        assert_eq!(publisher.sent(), 2);
        assert_eq!(buffer.len(), 1);
        assert_eq!(tracker.in_flight(), 2);

        publisher.on_credit(10);
        assert_eq!(publisher.drain(&mut buffer, &mut link, &mut tracker).unwrap(), 1);
        assert_eq!(publisher.credit(), 9);
    }

    #[test]
    fn tags_are_fresh_per_send() {
        let mut publisher = Publisher::new();
        let mut buffer = buffer_with(&[4, 4]);
        let mut link = CountingLink::default();
        let mut tracker = SettlementTracker::new();

        publisher.on_credit(2);
        publisher.drain(&mut buffer, &mut link, &mut tracker).unwrap();
        assert_ne!(link.sent[0].0, link.sent[1].0);
        assert!(tracker.is_pending(link.sent[0].0));
        assert!(tracker.is_pending(link.sent[1].0));
    }

    #[test]
    fn send_failure_keeps_credit_and_tracker_clean() {
        let mut publisher = Publisher::new();
        let mut buffer = buffer_with(&[1]);
        let mut link = CountingLink {
            fail: true,
            ..Default::default()
        };
        let mut tracker = SettlementTracker::new();

        publisher.on_credit(1);
        let err = publisher.drain(&mut buffer, &mut link, &mut tracker).unwrap_err();
        assert!(err.is_link_loss());
        assert_eq!(publisher.credit(), 1);
        assert_eq!(publisher.sent(), 0);
        assert_eq!(tracker.in_flight(), 0);
    }
}
