//! In-process transport.
//!
//! [`MemoryTransport`] is the relay-facing side; [`MemoryPeer`] plays the
//! downstream consumer: it grants credit, settles deliveries, and can drop
//! the link. In loopback mode the peer settles every delivery as soon as it
//! arrives and hands the credit back, which makes a dry-run sink.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Endpoint, Link, LinkEvent, Session, Transport};
use crate::error::{Error, Result};
use crate::model::{DeliveryTag, OutboundMessage};

/// Bound on buffered peer events per link.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A message as received by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Connection number the delivery arrived on, starting at 1.
    pub epoch: u64,
    pub tag: DeliveryTag,
    pub message: OutboundMessage,
}

#[derive(Default)]
struct Shared {
    epoch: u64,
    connected: bool,
    credit: u32,
    events: Option<mpsc::Sender<LinkEvent>>,
    deliveries: Vec<Delivery>,
    unsettled: Vec<DeliveryTag>,
    refused_connects: usize,
    loopback_window: Option<u32>,
}

impl Shared {
    fn raise(&mut self, event: LinkEvent) -> bool {
        let Some(events) = &self.events else {
            return false;
        };
        match events.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(?event, "peer event dropped: {e}");
                false
            }
        }
    }

    fn drop_link(&mut self) {
        self.connected = false;
        self.credit = 0;
        self.unsettled.clear();
        self.events = None;
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // A poisoned peer only means a test panicked mid-call; keep the state.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Relay-facing half of the in-process transport.
pub struct MemoryTransport {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryTransport {
    /// A transport whose peer is driven by hand through the returned handle.
    pub fn new() -> (Self, MemoryPeer) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            MemoryPeer { shared },
        )
    }

    /// A transport whose peer grants `window` credit on connect and settles
    /// each delivery immediately, returning its credit.
    pub fn loopback(window: u32) -> Self {
        let window = window.clamp(1, (EVENT_CHANNEL_CAPACITY / 2) as u32);
        let (transport, _peer) = Self::new();
        lock(&transport.shared).loopback_window = Some(window);
        transport
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Link = MemoryLink;

    async fn connect(&mut self, endpoint: &Endpoint) -> Result<Session<MemoryLink>> {
        let mut shared = lock(&self.shared);
        if shared.refused_connects > 0 {
            shared.refused_connects -= 1;
            return Err(Error::Connection(format!("{endpoint} refused the connection")));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        shared.drop_link();
        shared.epoch += 1;
        shared.connected = true;
        shared.events = Some(tx);
        if let Some(window) = shared.loopback_window {
            shared.credit = window;
            shared.raise(LinkEvent::Credit(window));
        }
        debug!(%endpoint, epoch = shared.epoch, "memory link opened");

        Ok(Session {
            link: MemoryLink {
                shared: Arc::clone(&self.shared),
                epoch: shared.epoch,
            },
            events: rx,
        })
    }
}

/// Send side of one in-process connection.
pub struct MemoryLink {
    shared: Arc<Mutex<Shared>>,
    epoch: u64,
}

impl MemoryLink {
    fn is_current(&self, shared: &Shared) -> bool {
        shared.connected && shared.epoch == self.epoch
    }
}

impl Link for MemoryLink {
    fn credit(&self) -> u32 {
        let shared = lock(&self.shared);
        if self.is_current(&shared) { shared.credit } else { 0 }
    }

    fn send(&mut self, tag: DeliveryTag, message: OutboundMessage) -> Result<()> {
        let mut shared = lock(&self.shared);
        if !self.is_current(&shared) {
            return Err(Error::Transport("link closed".to_string()));
        }
        if shared.credit == 0 {
            return Err(Error::NoCredit);
        }
        shared.credit -= 1;

        if shared.loopback_window.is_some() {
            info!(
                record_id = %message.id,
                %tag,
                body = message.body_str().unwrap_or("<binary>"),
                "loopback delivery"
            );
            shared.credit += 1;
            shared.raise(LinkEvent::Settled(tag));
            shared.raise(LinkEvent::Credit(1));
        } else {
            shared.unsettled.push(tag);
            shared.deliveries.push(Delivery {
                epoch: self.epoch,
                tag,
                message,
            });
        }
        Ok(())
    }

    fn close(&mut self) {
        let mut shared = lock(&self.shared);
        if self.is_current(&shared) {
            shared.drop_link();
        }
    }
}

/// Downstream half of the in-process transport.
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryPeer {
    /// Grant `n` credit on the open link. Returns false when disconnected.
    pub fn grant(&self, n: u32) -> bool {
        let mut shared = lock(&self.shared);
        if !shared.connected {
            return false;
        }
        shared.credit = shared.credit.saturating_add(n);
        shared.raise(LinkEvent::Credit(n))
    }

    /// Settle a delivery. Unknown or repeated tags are still reported to the
    /// relay, which must ignore them.
    pub fn settle(&self, tag: DeliveryTag) -> bool {
        let mut shared = lock(&self.shared);
        if !shared.connected {
            return false;
        }
        shared.unsettled.retain(|t| *t != tag);
        shared.raise(LinkEvent::Settled(tag))
    }

    /// Settle every delivery still outstanding on the open link.
    pub fn settle_all(&self) -> usize {
        let mut shared = lock(&self.shared);
        if !shared.connected {
            return 0;
        }
        let tags = std::mem::take(&mut shared.unsettled);
        tags.into_iter()
            .filter(|tag| shared.raise(LinkEvent::Settled(*tag)))
            .count()
    }

    /// Drop the link as if the network failed.
    pub fn disconnect(&self) {
        let mut shared = lock(&self.shared);
        if shared.connected {
            shared.raise(LinkEvent::Disconnected);
            shared.drop_link();
        }
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: usize) {
        lock(&self.shared).refused_connects = n;
    }

    /// Every delivery received so far, across all connections.
    pub fn deliveries(&self) -> Vec<Delivery> {
        lock(&self.shared).deliveries.clone()
    }

    /// Tags received on the open link and not yet settled.
    pub fn unsettled(&self) -> Vec<DeliveryTag> {
        lock(&self.shared).unsettled.clone()
    }

    /// Successful connections so far.
    pub fn connections(&self) -> u64 {
        lock(&self.shared).epoch
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared).connected
    }

    /// Remaining credit on the open link.
    pub fn credit(&self) -> u32 {
        let shared = lock(&self.shared);
        if shared.connected { shared.credit } else { 0 }
    }
}
