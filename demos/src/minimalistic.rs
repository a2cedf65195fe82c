//! Two nodes, one in-memory CAN segment: claim an alias each, then exchange
//! a datagram. Adapted from the teacher's minimalistic module example --
//! where that one assembled a single CBUS module against a persistence
//! layer, this one assembles two OpenLCB interfaces against each other and
//! drives them to completion.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::Duration;

use openlcb_can::{CanFrame, FrameSink, SystemClock, TransportError};
use openlcb_core::{Message, NodeId};
use openlcb_iface::{Interface, ThreadPoolExecutor};

/// A frame sink backed by a channel pair, standing in for a real CAN
/// transport so this example has no hardware dependency.
struct ChannelSink {
    tx: Sender<CanFrame>,
    rx: Mutex<Receiver<CanFrame>>,
}

impl ChannelSink {
    fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        (
            ChannelSink { tx: tx_a, rx: Mutex::new(rx_b) },
            ChannelSink { tx: tx_b, rx: Mutex::new(rx_a) },
        )
    }
}

impl FrameSink for ChannelSink {
    fn send(&self, frame: CanFrame) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    fn recv(&self) -> Result<CanFrame, TransportError> {
        self.rx.lock().unwrap().recv().map_err(|_| TransportError::Closed)
    }

    fn close(&self) {}
}

fn claim_alias(iface: &Interface<SystemClock, ThreadPoolExecutor, ChannelSink>) {
    while !iface.is_active() {
        iface.poll_arbiter();
        std::thread::sleep(Duration::from_millis(1));
    }
}

fn main() {
    env_logger::init();

    let node_a = NodeId::from_u64(0x01_02_03_04_05_06);
    let node_b = NodeId::from_u64(0x02_03_04_05_06_07);

    let (sink_a, sink_b) = ChannelSink::pair();
    let iface_a = Interface::new(node_a, SystemClock, ThreadPoolExecutor::new("openlcb-demo-a"), sink_a);
    let iface_b = Interface::new(node_b, SystemClock, ThreadPoolExecutor::new("openlcb-demo-b"), sink_b);

    let _rx_a = iface_a.run_receiver();
    let _rx_b = iface_b.run_receiver();

    iface_b.register_handler(
        None,
        std::sync::Arc::new(|msg: &Message| matches!(msg, Message::Datagram { .. })),
        std::sync::Arc::new(|msg: &Message| {
            if let Message::Datagram { source, payload, .. } = msg {
                println!("node B received datagram from {source}: {payload:?}");
            }
        }),
    );

    println!("claiming aliases...");
    claim_alias(&iface_a);
    claim_alias(&iface_b);
    println!(
        "node A alias {:03X}, node B alias {:03X}",
        iface_a.active_alias().unwrap(),
        iface_b.active_alias().unwrap()
    );

    iface_a.aliases().insert(iface_b.active_alias().unwrap(), node_b);
    iface_b.aliases().insert(iface_a.active_alias().unwrap(), node_a);

    let app_connection = iface_a.new_connection();
    iface_a
        .put(
            Message::Datagram {
                source: node_a,
                destination: node_b,
                payload: vec![0xDE, 0xAD, 0xBE, 0xEF],
            },
            Some(&app_connection),
        )
        .expect("put should succeed once both aliases are known");

    // Give the receiver thread a moment to drain the frame before tearing
    // the demo down.
    std::thread::sleep(Duration::from_millis(50));

    iface_a.dispose();
    iface_b.dispose();
}
