//! Value types and message taxonomy shared by every layer of the OpenLCB
//! node stack: 48-bit `NodeId`, 12-bit CAN `Alias`, the `Mti` bitfield, the
//! 64-bit `EventId`, and the `Message` tagged variant that replaces what a
//! class hierarchy would otherwise model.

#[macro_use]
pub mod macros;

pub mod event_id;
pub mod message;
pub mod mti;
pub mod node_id;

pub use event_id::EventId;
pub use message::Message;
pub use mti::Mti;
pub use node_id::{Alias, NodeId};
