//! CAN frame representation and the GridConnect ASCII envelope used to
//! carry it over serial tethers.

pub mod can;
pub mod gridconnect;

pub use can::{CanFrame, Continuation, ControlCode, MAX_PAYLOAD};
