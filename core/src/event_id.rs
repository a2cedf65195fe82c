use byteorder::{BigEndian, ByteOrder};
use core::fmt;

/// Size of an OpenLCB EventID in octets.
pub const EVENT_ID_SIZE: usize = 8;

/// A 64-bit OpenLCB event identifier.
///
/// Compared byte-wise; the top 48 bits conventionally carry the producing
/// node's NodeID and the low 16 bits a node-local event number, but this
/// type makes no assumption about that split — it is opaque payload as far
/// as the core is concerned.
#[derive(Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Default)]
pub struct EventId([u8; EVENT_ID_SIZE]);

impl EventId {
    /// Construct an EventID from its eight big-endian octets.
    pub const fn new(bytes: [u8; EVENT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Construct an EventID from a sequence of octets, in big-endian.
    ///
    /// # Panics
    /// The function panics if `data` is not eight octets long.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut bytes = [0; EVENT_ID_SIZE];
        bytes.copy_from_slice(data);
        Self(bytes)
    }

    /// Construct an EventID from its 64-bit integer value.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0; EVENT_ID_SIZE];
        BigEndian::write_u64(&mut bytes, value);
        Self(bytes)
    }

    /// Return the EventID as a sequence of octets, in big-endian.
    pub const fn as_bytes(&self) -> &[u8; EVENT_ID_SIZE] {
        &self.0
    }

    /// Return the EventID as a 64-bit integer value.
    pub fn as_u64(&self) -> u64 {
        BigEndian::read_u64(&self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}
