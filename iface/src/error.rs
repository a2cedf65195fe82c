use thiserror::Error;

use openlcb_can::{MessageBuilderError, TransportError};

/// Errors surfaced synchronously to an upper layer calling into the
/// interface. Inbound protocol errors never reach here -- those are logged
/// and the offending frame dropped, per the core's error handling design.
#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error(transparent)]
    MessageBuilder(#[from] MessageBuilderError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The interface was disposed; no further operations are accepted.
    #[error("interface has been disposed")]
    Disposed,
}

pub type InterfaceResult<T> = Result<T, InterfaceError>;
