//! Error types for outbox-relay.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// A send was attempted while the link had no credit. The publisher gates
    /// every send on credit, so this only surfaces on a defect.
    #[error("send attempted with zero link credit")]
    NoCredit,

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means the current link is gone and the relay
    /// should fall back to reconnecting.
    pub fn is_link_loss(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Connection(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
