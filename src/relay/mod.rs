//! The relay core: prefetch buffer, flow-controlled publisher, settlement
//! tracker, and the loop that schedules them.

pub mod buffer;
pub mod control;
pub mod publisher;
pub mod settlement;

pub use buffer::PrefetchBuffer;
pub use control::{Relay, RelayHandle, RelayState, RelayStats};
pub use publisher::Publisher;
pub use settlement::{Settlement, SettlementTracker};
