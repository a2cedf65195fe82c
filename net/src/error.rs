use thiserror::Error;

/// Errors raised while decoding the wire representation of a frame
/// (GridConnect ASCII, or a malformed raw CAN identifier).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("malformed GridConnect frame")]
    MalformedGridConnect,
    #[error("payload length exceeds 8 bytes")]
    PayloadTooLong,
}

pub type WireResult<T> = Result<T, WireError>;

/// Errors raised while turning a [`Message`](openlcb_core::Message) into
/// frames.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MessageBuilderError {
    /// The message's source NodeID has no known alias; the interface must
    /// arbitrate an alias before this node can originate traffic.
    #[error("no alias known for source node")]
    UnknownSourceAlias,
    /// The message's destination NodeID has no known alias; the upper
    /// layer must resolve the destination (e.g. via Verify NodeID) first.
    #[error("no alias known for destination node")]
    UnknownDestinationAlias,
}

pub type MessageBuilderResult<T> = Result<T, MessageBuilderError>;
