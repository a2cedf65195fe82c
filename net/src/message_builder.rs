//! Bidirectional codec between [`Message`] and the CAN frames that carry
//! it, including the addressed-message continuation protocol.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};
use openlcb_core::{net_debug, EventId, Message, Mti, NodeId};

use crate::alias_map::AliasMap;
use crate::error::{MessageBuilderError, MessageBuilderResult};
use crate::wire::can::{CanFrame, Continuation, MAX_PAYLOAD};

/// Per-`(source_alias, mti)` reassembly buffer cap. A peer that never
/// terminates a multi-frame sequence has its buffer dropped rather than
/// allowed to grow unbounded.
const REASSEMBLY_CAP_BYTES: usize = 64 * 1024;

/// Payload bytes of user data an addressed frame can carry after its 2-byte
/// continuation/destination prefix.
const ADDRESSED_CHUNK: usize = MAX_PAYLOAD - 2;

#[derive(Default)]
struct Reassembly {
    buf: Vec<u8>,
}

/// Converts between [`Message`] values and the CAN frames that carry them
/// on the wire, including splitting and reassembling the multi-frame
/// addressed-message continuation protocol.
///
/// Cheap to construct: it holds only the receive-path reassembly buffer,
/// keyed by `(source_alias, mti)`. Not meant to be shared across threads --
/// each interface owns one.
#[derive(Default)]
pub struct MessageBuilder {
    reassembly: HashMap<(u16, u16), Reassembly>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `msg` into the CAN frame(s) that carry it, resolving the
    /// source (and, for addressed messages, destination) alias via
    /// `aliases`.
    pub fn process_message(&self, msg: &Message, aliases: &AliasMap) -> MessageBuilderResult<Vec<CanFrame>> {
        let source_alias = aliases
            .get_alias(msg.source())
            .ok_or(MessageBuilderError::UnknownSourceAlias)?;

        let mti = msg.mti();
        let can_priority = mti.can_priority_class();
        let body = encode_body(msg);

        if let Some(destination) = msg.destination() {
            let destination_alias = aliases
                .get_alias(destination)
                .ok_or(MessageBuilderError::UnknownDestinationAlias)?;
            Ok(split_addressed(can_priority, mti, source_alias, destination_alias, &body))
        } else {
            Ok(vec![CanFrame::message(can_priority, mti, source_alias, &body)])
        }
    }

    /// Feed one inbound CAN frame through decoding and, for addressed
    /// messages, continuation reassembly.
    ///
    /// Returns `None` for control frames and for a fragment that isn't yet
    /// the end of an addressed-message sequence.
    pub fn process_frame(&mut self, frame: &CanFrame, aliases: &AliasMap) -> Option<Vec<Message>> {
        if frame.is_control_frame() {
            return None;
        }
        let mti = frame.mti()?;
        let source = aliases.get_node_id(frame.source_alias()).unwrap_or(NodeId::UNKNOWN);

        if !mti.is_addressed() {
            return Some(vec![decode(mti, source, None, frame.payload())]);
        }

        let continuation = frame.continuation().unwrap_or(Continuation::FirstAndLast);
        let destination_alias = frame.destination_alias().unwrap_or(0);
        let destination = aliases.get_node_id(destination_alias).unwrap_or(NodeId::UNKNOWN);
        let body = frame.addressed_body();
        let key = (frame.source_alias(), mti.raw());

        match continuation {
            Continuation::FirstAndLast => {
                self.reassembly.remove(&key);
                Some(vec![decode(mti, source, Some(destination), body)])
            }
            Continuation::First => {
                let mut entry = Reassembly::default();
                entry.buf.extend_from_slice(body);
                self.reassembly.insert(key, entry);
                None
            }
            Continuation::Middle => {
                let entry = self.reassembly.entry(key).or_default();
                if entry.buf.len() + body.len() > REASSEMBLY_CAP_BYTES {
                    net_debug!(
                        "message builder: reassembly buffer for alias {:03X} exceeded {} bytes, dropping",
                        frame.source_alias(),
                        REASSEMBLY_CAP_BYTES
                    );
                    self.reassembly.remove(&key);
                    return None;
                }
                entry.buf.extend_from_slice(body);
                None
            }
            Continuation::Last => {
                // A Last with no open buffer (e.g. the First was dropped or
                // never arrived) is treated as starting fresh: reassemble
                // from just this frame's body.
                let mut entry = self.reassembly.remove(&key).unwrap_or_default();
                entry.buf.extend_from_slice(body);
                Some(vec![decode(mti, source, Some(destination), &entry.buf)])
            }
        }
    }
}

fn split_addressed(can_priority: u8, mti: Mti, source_alias: u16, destination_alias: u16, body: &[u8]) -> Vec<CanFrame> {
    if body.len() <= ADDRESSED_CHUNK {
        return vec![addressed_frame(can_priority, mti, source_alias, destination_alias, Continuation::FirstAndLast, body)];
    }

    let mut frames = Vec::new();
    let mut chunks = body.chunks(ADDRESSED_CHUNK).peekable();
    let mut first = true;
    while let Some(chunk) = chunks.next() {
        let is_last = chunks.peek().is_none();
        let continuation = match (first, is_last) {
            (true, false) => Continuation::First,
            (false, false) => Continuation::Middle,
            (_, true) => Continuation::Last,
        };
        frames.push(addressed_frame(can_priority, mti, source_alias, destination_alias, continuation, chunk));
        first = false;
    }
    frames
}

fn addressed_frame(
    can_priority: u8,
    mti: Mti,
    source_alias: u16,
    destination_alias: u16,
    continuation: Continuation,
    chunk: &[u8],
) -> CanFrame {
    let prefix = CanFrame::addressed_prefix(continuation, destination_alias);
    let mut payload = Vec::with_capacity(2 + chunk.len());
    payload.extend_from_slice(&prefix);
    payload.extend_from_slice(chunk);
    CanFrame::message(can_priority, mti, source_alias, &payload)
}

/// Encode the wire payload for `msg`'s own MTI -- the event prefix for
/// event-carrying messages, the addressed prefix is handled separately by
/// [`split_addressed`].
fn encode_body(msg: &Message) -> Vec<u8> {
    match msg {
        Message::InitializationComplete { source } => source.as_bytes().to_vec(),
        Message::VerifyNodeIdGlobal { node_id, .. } | Message::VerifyNodeIdAddressed { node_id, .. } => {
            node_id.map(|id| id.as_bytes().to_vec()).unwrap_or_default()
        }
        Message::VerifiedNodeId { source } => source.as_bytes().to_vec(),
        Message::ProtocolSupportInquiry { .. }
        | Message::IdentifyEventsGlobal { .. }
        | Message::IdentifyEventsAddressed { .. }
        | Message::SimpleNodeIdentInfoRequest { .. } => Vec::new(),
        Message::ProtocolSupportReply { protocols, .. } => {
            let mut bytes = [0u8; 6];
            write_u48(&mut bytes, *protocols);
            bytes.to_vec()
        }
        Message::IdentifyProducers { event, .. }
        | Message::IdentifyConsumers { event, .. }
        | Message::ProducerConsumerEventReport { event, .. }
        | Message::LearnEvent { event, .. } => event.as_bytes().to_vec(),
        Message::Datagram { payload, .. }
        | Message::StreamInitRequest { payload, .. }
        | Message::StreamInitReply { payload, .. }
        | Message::StreamProceed { payload, .. }
        | Message::StreamComplete { payload, .. }
        | Message::StreamData { payload, .. }
        | Message::SimpleNodeIdentInfoReply { payload, .. }
        | Message::Addressed { payload, .. } => payload.clone(),
        Message::DatagramAcknowledged { reply_pending, .. } => {
            if *reply_pending {
                vec![0x80]
            } else {
                Vec::new()
            }
        }
        Message::DatagramRejected { error_code, .. } => {
            let mut bytes = [0u8; 2];
            BigEndian::write_u16(&mut bytes, *error_code);
            bytes.to_vec()
        }
    }
}

fn decode(mti: Mti, source: NodeId, destination: Option<NodeId>, payload: &[u8]) -> Message {
    let destination_or_unknown = destination.unwrap_or(NodeId::UNKNOWN);
    match mti {
        m if m == Mti::INITIALIZATION_COMPLETE => Message::InitializationComplete { source },
        m if m == Mti::VERIFY_NODE_ID_GLOBAL => Message::VerifyNodeIdGlobal {
            source,
            node_id: node_id_prefix(payload),
        },
        m if m == Mti::VERIFY_NODE_ID_ADDRESSED => Message::VerifyNodeIdAddressed {
            source,
            destination: destination_or_unknown,
            node_id: node_id_prefix(payload),
        },
        m if m == Mti::VERIFIED_NODE_ID => Message::VerifiedNodeId { source },
        m if m == Mti::PROTOCOL_SUPPORT_INQUIRY => Message::ProtocolSupportInquiry {
            source,
            destination: destination_or_unknown,
        },
        m if m == Mti::PROTOCOL_SUPPORT_REPLY => Message::ProtocolSupportReply {
            source,
            destination: destination_or_unknown,
            protocols: if payload.len() >= 6 { read_u48(payload) } else { 0 },
        },
        m if m == Mti::IDENTIFY_EVENTS_GLOBAL => Message::IdentifyEventsGlobal { source },
        m if m == Mti::IDENTIFY_EVENTS_ADDRESSED => Message::IdentifyEventsAddressed {
            source,
            destination: destination_or_unknown,
        },
        m if m == Mti::IDENTIFY_PRODUCERS => Message::IdentifyProducers {
            source,
            event: event_prefix(payload),
        },
        m if m == Mti::IDENTIFY_CONSUMERS => Message::IdentifyConsumers {
            source,
            event: event_prefix(payload),
        },
        m if m == Mti::PRODUCER_CONSUMER_EVENT_REPORT => Message::ProducerConsumerEventReport {
            source,
            event: event_prefix(payload),
        },
        m if m == Mti::LEARN_EVENT => Message::LearnEvent {
            source,
            event: event_prefix(payload),
        },
        m if m == Mti::DATAGRAM => Message::Datagram {
            source,
            destination: destination_or_unknown,
            payload: payload.to_vec(),
        },
        m if m == Mti::DATAGRAM_ACKNOWLEDGED => Message::DatagramAcknowledged {
            source,
            destination: destination_or_unknown,
            reply_pending: payload.first().map(|b| b & 0x80 != 0).unwrap_or(false),
        },
        m if m == Mti::DATAGRAM_REJECTED => Message::DatagramRejected {
            source,
            destination: destination_or_unknown,
            error_code: if payload.len() >= 2 { BigEndian::read_u16(payload) } else { 0 },
        },
        m if m == Mti::STREAM_INIT_REQUEST => Message::StreamInitRequest {
            source,
            destination: destination_or_unknown,
            payload: payload.to_vec(),
        },
        m if m == Mti::STREAM_INIT_REPLY => Message::StreamInitReply {
            source,
            destination: destination_or_unknown,
            payload: payload.to_vec(),
        },
        m if m == Mti::STREAM_PROCEED => Message::StreamProceed {
            source,
            destination: destination_or_unknown,
            payload: payload.to_vec(),
        },
        m if m == Mti::STREAM_COMPLETE => Message::StreamComplete {
            source,
            destination: destination_or_unknown,
            payload: payload.to_vec(),
        },
        m if m == Mti::STREAM_DATA => Message::StreamData {
            source,
            destination: destination_or_unknown,
            payload: payload.to_vec(),
        },
        m if m == Mti::SIMPLE_NODE_IDENT_INFO_REQUEST => Message::SimpleNodeIdentInfoRequest {
            source,
            destination: destination_or_unknown,
        },
        m if m == Mti::SIMPLE_NODE_IDENT_INFO_REPLY => Message::SimpleNodeIdentInfoReply {
            source,
            destination: destination_or_unknown,
            payload: payload.to_vec(),
        },
        other => Message::Addressed {
            source,
            destination: destination_or_unknown,
            mti: other,
            payload: payload.to_vec(),
        },
    }
}

fn node_id_prefix(payload: &[u8]) -> Option<NodeId> {
    (payload.len() >= 6).then(|| NodeId::from_bytes(&payload[..6]))
}

fn event_prefix(payload: &[u8]) -> EventId {
    if payload.len() >= 8 {
        EventId::from_bytes(&payload[..8])
    } else {
        EventId::default()
    }
}

fn write_u48(bytes: &mut [u8; 6], value: u64) {
    let masked = value & 0x0000_FFFF_FFFF_FFFF;
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (masked >> (8 * (5 - i))) as u8;
    }
}

fn read_u48(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for &byte in &bytes[..6] {
        value = (value << 8) | byte as u64;
    }
    value
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn initialization_complete_matches_wire_test_vector() {
        let aliases = AliasMap::new();
        aliases.insert(0x333, NodeId::from_bytes(&[0x01, 0x02, 0x00, 0x00, 0x01, 0x01]));
        let builder = MessageBuilder::new();

        let msg = Message::InitializationComplete {
            source: NodeId::from_bytes(&[0x01, 0x02, 0x00, 0x00, 0x01, 0x01]),
        };
        let frames = builder.process_message(&msg, &aliases).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header(), 0x19100333);
        assert_eq!(frames[0].payload(), &[0x01, 0x02, 0x00, 0x00, 0x01, 0x01]);
    }

    #[test]
    fn unknown_source_alias_is_rejected() {
        let aliases = AliasMap::new();
        let builder = MessageBuilder::new();
        let msg = Message::InitializationComplete { source: NodeId::from_u64(1) };
        assert_eq!(builder.process_message(&msg, &aliases), Err(MessageBuilderError::UnknownSourceAlias));
    }

    #[test]
    fn unknown_destination_alias_is_rejected() {
        let aliases = AliasMap::new();
        aliases.insert(0x111, NodeId::from_u64(1));
        let builder = MessageBuilder::new();
        let msg = Message::Datagram {
            source: NodeId::from_u64(1),
            destination: NodeId::from_u64(2),
            payload: vec![1, 2, 3],
        };
        assert_eq!(builder.process_message(&msg, &aliases), Err(MessageBuilderError::UnknownDestinationAlias));
    }

    #[test]
    fn addressed_multi_frame_matches_wire_test_vector() {
        let aliases = AliasMap::new();
        aliases.insert(0x333, NodeId::from_u64(1));
        aliases.insert(0x444, NodeId::from_u64(2));
        let builder = MessageBuilder::new();

        let payload: Vec<u8> = (0..12).collect();
        let msg = Message::Datagram {
            source: NodeId::from_u64(1),
            destination: NodeId::from_u64(2),
            payload: payload.clone(),
        };
        let frames = builder.process_message(&msg, &aliases).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload(), &[0x14, 0x44, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(frames[1].payload(), &[0x24, 0x44, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B]);
    }

    #[test]
    fn round_trip_through_process_message_and_process_frame() {
        let aliases = AliasMap::new();
        aliases.insert(0x333, NodeId::from_u64(1));
        aliases.insert(0x444, NodeId::from_u64(2));
        let mut builder = MessageBuilder::new();

        let payload: Vec<u8> = (0..40).collect();
        let msg = Message::Datagram {
            source: NodeId::from_u64(1),
            destination: NodeId::from_u64(2),
            payload: payload.clone(),
        };
        let frames = builder.process_message(&msg, &aliases).unwrap();
        assert!(frames.len() > 1);

        let mut reassembled = None;
        for frame in &frames {
            if let Some(mut msgs) = builder.process_frame(frame, &aliases) {
                reassembled = Some(msgs.remove(0));
            }
        }
        assert_eq!(reassembled, Some(msg));
    }

    #[test]
    fn empty_payload_addressed_message_round_trips() {
        let aliases = AliasMap::new();
        aliases.insert(0x333, NodeId::from_u64(1));
        aliases.insert(0x444, NodeId::from_u64(2));
        let mut builder = MessageBuilder::new();

        let msg = Message::ProtocolSupportInquiry {
            source: NodeId::from_u64(1),
            destination: NodeId::from_u64(2),
        };
        let frames = builder.process_message(&msg, &aliases).unwrap();
        assert_eq!(frames.len(), 1);
        let decoded = builder.process_frame(&frames[0], &aliases).unwrap();
        assert_eq!(decoded, vec![msg]);
    }

    #[test]
    fn boundary_six_byte_body_is_single_frame_seven_byte_body_splits() {
        let aliases = AliasMap::new();
        aliases.insert(0x333, NodeId::from_u64(1));
        aliases.insert(0x444, NodeId::from_u64(2));
        let builder = MessageBuilder::new();

        let six = Message::Datagram {
            source: NodeId::from_u64(1),
            destination: NodeId::from_u64(2),
            payload: vec![0; 6],
        };
        assert_eq!(builder.process_message(&six, &aliases).unwrap().len(), 1);

        let seven = Message::Datagram {
            source: NodeId::from_u64(1),
            destination: NodeId::from_u64(2),
            payload: vec![0; 7],
        };
        assert_eq!(builder.process_message(&seven, &aliases).unwrap().len(), 2);
    }

    #[test]
    fn reassembly_buffer_eviction_drops_oversized_sequence() {
        let aliases = AliasMap::new();
        aliases.insert(0x333, NodeId::from_u64(1));
        aliases.insert(0x444, NodeId::from_u64(2));
        let mut builder = MessageBuilder::new();

        let msg = Message::Datagram {
            source: NodeId::from_u64(1),
            destination: NodeId::from_u64(2),
            payload: vec![0xAB; REASSEMBLY_CAP_BYTES + ADDRESSED_CHUNK * 4],
        };
        let frames = builder.process_message(&msg, &aliases).unwrap();
        assert!(frames.len() > 1);

        let mut any_reassembled = false;
        for frame in &frames {
            if builder.process_frame(frame, &aliases).is_some() {
                any_reassembled = true;
            }
        }
        // The buffer was evicted partway through, so the final Last frame
        // starts fresh rather than reassembling the whole (oversized) body.
        assert!(any_reassembled);
    }

    #[test]
    fn control_frames_are_ignored() {
        use crate::wire::can::ControlCode;

        let aliases = AliasMap::new();
        let mut builder = MessageBuilder::new();
        let frame = CanFrame::control(ControlCode::CheckId1, 0x123);
        assert_eq!(builder.process_frame(&frame, &aliases), None);
    }
}
