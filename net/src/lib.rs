#![deny(unsafe_code)]

//! CAN frame codec, GridConnect ASCII envelope, alias registry, addressed-
//! message reassembly, and alias arbitration for an OpenLCB (NMRA-NET /
//! LCC) node stack's CAN segment.
//!
//! This crate is the wire-and-segment layer: it knows how to turn a
//! [`Message`](openlcb_core::Message) into [`CanFrame`]s and back, how to
//! speak those frames over a GridConnect ASCII tether, how to claim and
//! defend a CAN alias, and how to keep a segment's alias-to-NodeID mapping
//! current. It has no notion of an application's handler callbacks or
//! executor -- that's the concern of the interface crate built on top of it.

pub mod alias_arbiter;
pub mod alias_map;
pub mod error;
pub mod message_builder;
pub mod phy;
pub mod wire;

pub use alias_arbiter::{AliasArbiter, ArbiterEvent, Clock, FakeClock, SystemClock};
pub use alias_map::AliasMap;
pub use error::{MessageBuilderError, MessageBuilderResult, WireError, WireResult};
pub use message_builder::MessageBuilder;
pub use phy::{FrameSink, GridConnectSink, TransportError};
pub use wire::{CanFrame, Continuation, ControlCode, MAX_PAYLOAD};
