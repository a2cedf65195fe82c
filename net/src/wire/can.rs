use byteorder::{BigEndian, ByteOrder};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use openlcb_core::Mti;

/// Maximum CAN data-length-code payload.
pub const MAX_PAYLOAD: usize = 8;

const RESERVED_BIT: u32 = 1 << 28;
const FRAME_TYPE_BIT: u32 = 1 << 27;
const ALIAS_MASK: u32 = 0x0FFF;
const VARIABLE_FIELD_SHIFT: u32 = 12;
const VARIABLE_FIELD_MASK: u32 = 0x7FFF;
const HEADER_MASK: u32 = 0x1FFF_FFFF;
const CONTROL_CODE_MASK: u16 = 0x000F;
const MTI_MASK: u16 = 0x0FFF;

/// Sub-codes carried in the variable-field of a CAN control frame
/// (frame-type bit clear) -- CID1-CID4, RID, and alias-map traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum ControlCode {
    CheckId1 = 0x1,
    CheckId2 = 0x2,
    CheckId3 = 0x3,
    CheckId4 = 0x4,
    ReserveId = 0x5,
    AliasMapDefinition = 0x6,
    AliasMapEnquiry = 0x7,
    AliasMapReset = 0x8,
}

impl ControlCode {
    fn code(self) -> u16 {
        self.into()
    }

    fn from_code(code: u16) -> Option<Self> {
        Self::try_from(code).ok()
    }
}

/// Continuation state of an addressed-message frame, carried in the top
/// two bits of its first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    FirstAndLast,
    First,
    Last,
    Middle,
}

impl Continuation {
    pub const fn bits(self) -> u8 {
        match self {
            Continuation::FirstAndLast => 0b00,
            Continuation::First => 0b01,
            Continuation::Last => 0b10,
            Continuation::Middle => 0b11,
        }
    }

    const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Continuation::FirstAndLast,
            0b01 => Continuation::First,
            0b10 => Continuation::Last,
            _ => Continuation::Middle,
        }
    }
}

/// A 29-bit OpenLCB CAN frame: header plus 0-8 payload bytes.
///
/// The identifier decomposes as `[reserved:1=1][frame-type:1]
/// [variable-field:15][source-alias:12]`. For message frames the
/// variable-field further splits into a 3-bit CAN arbitration priority and
/// the 12-bit MTI; for control frames (CID1-4, RID, alias-map traffic) its
/// low 4 bits carry a [`ControlCode`] and the low 12 header bits carry the
/// candidate/claimed alias rather than a "source".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    header: u32,
    len: u8,
    data: [u8; MAX_PAYLOAD],
}

impl CanFrame {
    /// Construct a frame from a raw header and payload slice.
    ///
    /// # Panics
    /// Panics if `payload` is longer than [`MAX_PAYLOAD`].
    pub fn new(header: u32, payload: &[u8]) -> Self {
        assert!(payload.len() <= MAX_PAYLOAD, "CAN payload exceeds 8 bytes");
        let mut data = [0u8; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Self {
            header: header & HEADER_MASK,
            len: payload.len() as u8,
            data,
        }
    }

    /// Construct an OpenLCB-message frame from its MTI, CAN arbitration
    /// priority, and source alias.
    pub fn message(can_priority: u8, mti: Mti, source_alias: u16, payload: &[u8]) -> Self {
        let variable_field = ((can_priority as u32 & 0x7) << 12) | (mti.raw() as u32 & MTI_MASK as u32);
        let header = RESERVED_BIT | FRAME_TYPE_BIT | (variable_field << VARIABLE_FIELD_SHIFT) | (source_alias as u32 & ALIAS_MASK);
        Self::new(header, payload)
    }

    /// Construct a CAN control frame (CID/RID/alias-map traffic) carrying
    /// `alias` as its candidate or claimed alias.
    pub fn control(code: ControlCode, alias: u16) -> Self {
        Self::control_with_payload(code, alias, &[])
    }

    /// As [`control`](Self::control), but with an explicit payload -- used
    /// by Alias Map Definition, which carries the claiming node's NodeID.
    pub fn control_with_payload(code: ControlCode, alias: u16, payload: &[u8]) -> Self {
        let variable_field = code.code() as u32 & CONTROL_CODE_MASK as u32;
        let header = RESERVED_BIT | (variable_field << VARIABLE_FIELD_SHIFT) | (alias as u32 & ALIAS_MASK);
        Self::new(header, payload)
    }

    pub const fn header(&self) -> u32 {
        self.header
    }

    pub const fn len(&self) -> usize {
        self.len as usize
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// The 12-bit alias in the low bits of the header: the sender's alias
    /// for message frames, or the candidate/claimed alias for control
    /// frames.
    pub const fn source_alias(&self) -> u16 {
        (self.header & ALIAS_MASK) as u16
    }

    pub const fn variable_field(&self) -> u16 {
        ((self.header >> VARIABLE_FIELD_SHIFT) & VARIABLE_FIELD_MASK) as u16
    }

    pub const fn is_message_frame(&self) -> bool {
        self.header & FRAME_TYPE_BIT != 0
    }

    pub const fn is_control_frame(&self) -> bool {
        !self.is_message_frame()
    }

    pub const fn can_priority(&self) -> Option<u8> {
        if self.is_message_frame() {
            Some((self.variable_field() >> 12) as u8 & 0x7)
        } else {
            None
        }
    }

    pub fn mti(&self) -> Option<Mti> {
        self.is_message_frame().then(|| Mti::from_raw(self.variable_field() & MTI_MASK))
    }

    pub fn control_code(&self) -> Option<ControlCode> {
        if self.is_control_frame() {
            ControlCode::from_code(self.variable_field() & CONTROL_CODE_MASK)
        } else {
            None
        }
    }

    pub fn is_initialization_complete(&self) -> bool {
        self.mti() == Some(Mti::INITIALIZATION_COMPLETE)
    }

    pub fn is_verified_nid(&self) -> bool {
        self.mti() == Some(Mti::VERIFIED_NODE_ID)
    }

    pub fn is_alias_map_definition(&self) -> bool {
        self.control_code() == Some(ControlCode::AliasMapDefinition)
    }

    pub fn is_alias_map_reset(&self) -> bool {
        self.control_code() == Some(ControlCode::AliasMapReset)
    }

    pub fn is_alias_map_enquiry(&self) -> bool {
        self.control_code() == Some(ControlCode::AliasMapEnquiry)
    }

    pub fn is_check_id1(&self) -> bool {
        self.control_code() == Some(ControlCode::CheckId1)
    }

    pub fn is_check_id2(&self) -> bool {
        self.control_code() == Some(ControlCode::CheckId2)
    }

    pub fn is_check_id3(&self) -> bool {
        self.control_code() == Some(ControlCode::CheckId3)
    }

    pub fn is_check_id4(&self) -> bool {
        self.control_code() == Some(ControlCode::CheckId4)
    }

    pub fn is_reserve_id(&self) -> bool {
        self.control_code() == Some(ControlCode::ReserveId)
    }

    /// Continuation state of an addressed-message frame, from the top two
    /// bits of the first payload byte. `None` for control frames or an
    /// empty payload.
    pub fn continuation(&self) -> Option<Continuation> {
        if self.is_message_frame() && !self.is_empty() {
            Some(Continuation::from_bits(self.data[0] >> 4))
        } else {
            None
        }
    }

    /// Destination alias of an addressed-message frame, from the low 12
    /// bits of its first two payload bytes.
    pub fn destination_alias(&self) -> Option<u16> {
        if self.is_message_frame() && self.len() >= 2 {
            Some(BigEndian::read_u16(&self.data[0..2]) & ALIAS_MASK as u16)
        } else {
            None
        }
    }

    /// The addressed-message payload bytes, i.e. everything after the
    /// 2-byte continuation/destination prefix.
    pub fn addressed_body(&self) -> &[u8] {
        let start = 2.min(self.len());
        &self.data[start..self.len()]
    }

    /// Build the 2-byte continuation/destination-alias prefix used by
    /// addressed-message frames: `[reserved:2=0][continuation:2]
    /// [destination-alias:12]`.
    pub fn addressed_prefix(continuation: Continuation, destination_alias: u16) -> [u8; 2] {
        let value = ((continuation.bits() as u16) << 12) | (destination_alias & 0x0FFF);
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, value);
        bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initialization_complete_header_matches_test_vector() {
        let frame = CanFrame::message(1, Mti::INITIALIZATION_COMPLETE, 0x333, &[0x01, 0x02, 0x00, 0x00, 0x01, 0x01]);
        assert_eq!(frame.header(), 0x19100333);
        assert_eq!(frame.source_alias(), 0x333);
        assert!(frame.is_initialization_complete());
        assert_eq!(frame.payload(), &[0x01, 0x02, 0x00, 0x00, 0x01, 0x01]);
    }

    #[test]
    fn control_frame_round_trips_candidate_alias_and_code() {
        let frame = CanFrame::control(ControlCode::CheckId3, 0x123);
        assert!(frame.is_control_frame());
        assert_eq!(frame.source_alias(), 0x123);
        assert!(frame.is_check_id3());
        assert!(!frame.is_check_id1());
    }

    #[test]
    fn addressed_prefix_round_trips_continuation_and_destination() {
        let prefix = CanFrame::addressed_prefix(Continuation::First, 0x444);
        let frame = CanFrame::message(1, Mti::DATAGRAM, 0x333, &[prefix[0], prefix[1], 1, 2, 3]);
        assert_eq!(frame.continuation(), Some(Continuation::First));
        assert_eq!(frame.destination_alias(), Some(0x444));
        assert_eq!(frame.addressed_body(), &[1, 2, 3]);
    }
}
