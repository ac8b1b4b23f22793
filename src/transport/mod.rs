//! Transport seam: a credit-based send/settle channel to the downstream
//! consumer.
//!
//! A [`Transport`] opens [`Session`]s. Each session pairs a [`Link`] (the
//! send side, gated on credit) with a bounded stream of [`LinkEvent`]s raised
//! by the peer: credit grants, settlements, and link loss.

pub mod memory;

pub use memory::{Delivery, MemoryPeer, MemoryTransport};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::model::{DeliveryTag, OutboundMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Where to connect and which destination to publish to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub address: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            address: address.into(),
        }
    }
}

impl From<&RelayConfig> for Endpoint {
    fn from(config: &RelayConfig) -> Self {
        Self::new(config.host.clone(), config.address.clone())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.address)
    }
}

/// Events the peer raises on an open link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The peer granted `n` more sends.
    Credit(u32),
    /// The peer durably accepted the delivery with this tag.
    Settled(DeliveryTag),
    /// The link is gone. No further events follow.
    Disconnected,
}

/// An open link plus the events its peer raises.
pub struct Session<L> {
    pub link: L,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Send side of an open link.
pub trait Link: Send {
    /// Credit the peer has granted and not yet consumed.
    fn credit(&self) -> u32;

    /// Hand one message to the peer. Consumes one unit of credit.
    ///
    /// Fails with [`crate::error::Error::NoCredit`] at zero credit and with
    /// [`crate::error::Error::Transport`] once the link is closed.
    fn send(&mut self, tag: DeliveryTag, message: OutboundMessage) -> Result<()>;

    /// Close the link from our side.
    fn close(&mut self);
}

#[async_trait]
pub trait Transport: Send {
    type Link: Link + 'static;

    /// Establish a link. Fails with [`crate::error::Error::Connection`].
    async fn connect(&mut self, endpoint: &Endpoint) -> Result<Session<Self::Link>>;
}
