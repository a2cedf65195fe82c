use crate::event_id::EventId;
use crate::mti::Mti;
use crate::node_id::NodeId;

/// The decoded form of every application-level message this stack
/// understands.
///
/// This is the taxonomy a class hierarchy would otherwise express as one
/// type per MTI; a single tagged enum lets `match` stand in for dynamic
/// dispatch and keeps each variant's payload typed instead of a raw byte
/// slice the caller has to know how to interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    InitializationComplete {
        source: NodeId,
    },
    VerifyNodeIdGlobal {
        source: NodeId,
        node_id: Option<NodeId>,
    },
    VerifyNodeIdAddressed {
        source: NodeId,
        destination: NodeId,
        node_id: Option<NodeId>,
    },
    VerifiedNodeId {
        source: NodeId,
    },
    ProtocolSupportInquiry {
        source: NodeId,
        destination: NodeId,
    },
    ProtocolSupportReply {
        source: NodeId,
        destination: NodeId,
        protocols: u64,
    },
    IdentifyEventsGlobal {
        source: NodeId,
    },
    IdentifyEventsAddressed {
        source: NodeId,
        destination: NodeId,
    },
    IdentifyProducers {
        source: NodeId,
        event: EventId,
    },
    IdentifyConsumers {
        source: NodeId,
        event: EventId,
    },
    ProducerConsumerEventReport {
        source: NodeId,
        event: EventId,
    },
    LearnEvent {
        source: NodeId,
        event: EventId,
    },
    Datagram {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
    DatagramAcknowledged {
        source: NodeId,
        destination: NodeId,
        reply_pending: bool,
    },
    DatagramRejected {
        source: NodeId,
        destination: NodeId,
        error_code: u16,
    },
    StreamInitRequest {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
    StreamInitReply {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
    StreamProceed {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
    StreamComplete {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
    StreamData {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
    SimpleNodeIdentInfoRequest {
        source: NodeId,
        destination: NodeId,
    },
    SimpleNodeIdentInfoReply {
        source: NodeId,
        destination: NodeId,
        payload: Vec<u8>,
    },
    /// An addressed message whose MTI this stack doesn't assign its own
    /// variant to. Carried through rather than dropped, so a node can still
    /// forward or log traffic for protocols it doesn't implement.
    Addressed {
        source: NodeId,
        destination: NodeId,
        mti: Mti,
        payload: Vec<u8>,
    },
}

impl Message {
    /// The node that originated this message.
    pub fn source(&self) -> NodeId {
        match self {
            Message::InitializationComplete { source }
            | Message::VerifyNodeIdGlobal { source, .. }
            | Message::VerifyNodeIdAddressed { source, .. }
            | Message::VerifiedNodeId { source }
            | Message::ProtocolSupportInquiry { source, .. }
            | Message::ProtocolSupportReply { source, .. }
            | Message::IdentifyEventsGlobal { source }
            | Message::IdentifyEventsAddressed { source, .. }
            | Message::IdentifyProducers { source, .. }
            | Message::IdentifyConsumers { source, .. }
            | Message::ProducerConsumerEventReport { source, .. }
            | Message::LearnEvent { source, .. }
            | Message::Datagram { source, .. }
            | Message::DatagramAcknowledged { source, .. }
            | Message::DatagramRejected { source, .. }
            | Message::StreamInitRequest { source, .. }
            | Message::StreamInitReply { source, .. }
            | Message::StreamProceed { source, .. }
            | Message::StreamComplete { source, .. }
            | Message::StreamData { source, .. }
            | Message::SimpleNodeIdentInfoRequest { source, .. }
            | Message::SimpleNodeIdentInfoReply { source, .. }
            | Message::Addressed { source, .. } => *source,
        }
    }

    /// The destination node, for addressed messages; `None` for global ones.
    pub fn destination(&self) -> Option<NodeId> {
        match self {
            Message::VerifyNodeIdAddressed { destination, .. }
            | Message::ProtocolSupportInquiry { destination, .. }
            | Message::ProtocolSupportReply { destination, .. }
            | Message::IdentifyEventsAddressed { destination, .. }
            | Message::Datagram { destination, .. }
            | Message::DatagramAcknowledged { destination, .. }
            | Message::DatagramRejected { destination, .. }
            | Message::StreamInitRequest { destination, .. }
            | Message::StreamInitReply { destination, .. }
            | Message::StreamProceed { destination, .. }
            | Message::StreamComplete { destination, .. }
            | Message::StreamData { destination, .. }
            | Message::SimpleNodeIdentInfoRequest { destination, .. }
            | Message::SimpleNodeIdentInfoReply { destination, .. }
            | Message::Addressed { destination, .. } => Some(*destination),
            _ => None,
        }
    }

    /// The EventID this message carries, if any.
    pub fn event(&self) -> Option<EventId> {
        match self {
            Message::IdentifyProducers { event, .. }
            | Message::IdentifyConsumers { event, .. }
            | Message::ProducerConsumerEventReport { event, .. }
            | Message::LearnEvent { event, .. } => Some(*event),
            _ => None,
        }
    }

    /// True if this message is addressed to a specific node rather than
    /// broadcast to the whole segment.
    pub fn is_addressed(&self) -> bool {
        self.destination().is_some()
    }

    /// The MTI this message would be encoded with on the wire.
    pub fn mti(&self) -> Mti {
        match self {
            Message::InitializationComplete { .. } => Mti::INITIALIZATION_COMPLETE,
            Message::VerifyNodeIdGlobal { .. } => Mti::VERIFY_NODE_ID_GLOBAL,
            Message::VerifyNodeIdAddressed { .. } => Mti::VERIFY_NODE_ID_ADDRESSED,
            Message::VerifiedNodeId { .. } => Mti::VERIFIED_NODE_ID,
            Message::ProtocolSupportInquiry { .. } => Mti::PROTOCOL_SUPPORT_INQUIRY,
            Message::ProtocolSupportReply { .. } => Mti::PROTOCOL_SUPPORT_REPLY,
            Message::IdentifyEventsGlobal { .. } => Mti::IDENTIFY_EVENTS_GLOBAL,
            Message::IdentifyEventsAddressed { .. } => Mti::IDENTIFY_EVENTS_ADDRESSED,
            Message::IdentifyProducers { .. } => Mti::IDENTIFY_PRODUCERS,
            Message::IdentifyConsumers { .. } => Mti::IDENTIFY_CONSUMERS,
            Message::ProducerConsumerEventReport { .. } => Mti::PRODUCER_CONSUMER_EVENT_REPORT,
            Message::LearnEvent { .. } => Mti::LEARN_EVENT,
            Message::Datagram { .. } => Mti::DATAGRAM,
            Message::DatagramAcknowledged { .. } => Mti::DATAGRAM_ACKNOWLEDGED,
            Message::DatagramRejected { .. } => Mti::DATAGRAM_REJECTED,
            Message::StreamInitRequest { .. } => Mti::STREAM_INIT_REQUEST,
            Message::StreamInitReply { .. } => Mti::STREAM_INIT_REPLY,
            Message::StreamProceed { .. } => Mti::STREAM_PROCEED,
            Message::StreamComplete { .. } => Mti::STREAM_COMPLETE,
            Message::StreamData { .. } => Mti::STREAM_DATA,
            Message::SimpleNodeIdentInfoRequest { .. } => Mti::SIMPLE_NODE_IDENT_INFO_REQUEST,
            Message::SimpleNodeIdentInfoReply { .. } => Mti::SIMPLE_NODE_IDENT_INFO_REPLY,
            Message::Addressed { mti, .. } => *mti,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn global_message_has_no_destination() {
        let msg = Message::InitializationComplete {
            source: NodeId::from_u64(1),
        };
        assert_eq!(msg.destination(), None);
        assert!(!msg.is_addressed());
        assert_eq!(msg.mti(), Mti::INITIALIZATION_COMPLETE);
    }

    #[test]
    fn addressed_message_reports_destination() {
        let msg = Message::Datagram {
            source: NodeId::from_u64(1),
            destination: NodeId::from_u64(2),
            payload: vec![1, 2, 3],
        };
        assert_eq!(msg.destination(), Some(NodeId::from_u64(2)));
        assert!(msg.is_addressed());
    }

    #[test]
    fn event_message_carries_event_id() {
        let evt = EventId::from_u64(0xAABB);
        let msg = Message::ProducerConsumerEventReport {
            source: NodeId::from_u64(1),
            event: evt,
        };
        assert_eq!(msg.event(), Some(evt));

        let no_evt = Message::VerifiedNodeId {
            source: NodeId::from_u64(1),
        };
        assert_eq!(no_evt.event(), None);
    }

    #[test]
    fn fallback_variant_carries_its_own_mti() {
        let mti = Mti::new(3, true, true, false, 0x3F);
        let msg = Message::Addressed {
            source: NodeId::from_u64(1),
            destination: NodeId::from_u64(2),
            mti,
            payload: vec![],
        };
        assert_eq!(msg.mti(), mti);
    }
}
