#![deny(unsafe_code)]

//! The interface dispatcher: the connection-oriented surface upper-layer
//! services (datagram transport, memory/configuration access, event
//! producers/consumers, throttles) use to send and receive OpenLCB
//! messages, built on top of [`openlcb_can`]'s frame codec, alias registry
//! and arbitration state machine.
//!
//! Everything -- inbound parsing, handler dispatch, outbound serialization,
//! and alias-arbiter transitions -- is serialized through one [`Executor`]
//! so upper-layer handlers always observe a single-threaded view of
//! interface state, even though frames arrive on a dedicated I/O thread.

pub mod error;
pub mod executor;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use openlcb_can::{AliasArbiter, AliasMap, ArbiterEvent, CanFrame, Clock, FrameSink, MessageBuilder, TransportError};
use openlcb_core::{net_debug, net_trace, Message, NodeId};

pub use error::{InterfaceError, InterfaceResult};
pub use executor::{Executor, InlineExecutor, Task, ThreadPoolExecutor};

/// Opaque handle returned by [`Interface::register_handler`]. Currently
/// unused for deregistration -- there is no `unregister_handler` yet, since
/// nothing in the supported upper layers needs one.
pub type HandlerId = u64;

/// Identifies one upper-layer client of the interface's connection contract
/// (spec.md §6). Obtained from [`Interface::new_connection`], passed as the
/// `sender` to [`Interface::put`] and optionally tied to a handler at
/// [`Interface::register_handler`] time, so dispatch can skip delivering a
/// message straight back to the connection that submitted it -- other
/// connections, and handlers registered without one, still see it normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection(u64);

/// A message-kind filter, matched against every inbound message in
/// registration order.
pub type Predicate = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Invoked once per inbound message for each handler whose predicate
/// matched.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Clone)]
struct RegisteredHandler {
    id: HandlerId,
    connection: Option<Connection>,
    predicate: Predicate,
    handler: Handler,
}

/// Copy-on-write handler list: dispatch clones the current `Arc<Vec<_>>`
/// (cheap, one refcount bump) and never blocks on a concurrent
/// registration; registration builds a fresh `Vec` and swaps it in.
struct HandlerRegistry {
    handlers: Mutex<Arc<Vec<RegisteredHandler>>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    fn new() -> Self {
        Self {
            handlers: Mutex::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    fn register(&self, connection: Option<Connection>, predicate: Predicate, handler: Handler) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.handlers.lock().unwrap();
        let mut next: Vec<RegisteredHandler> = (**slot).clone();
        next.push(RegisteredHandler { id, connection, predicate, handler });
        *slot = Arc::new(next);
        id
    }

    /// Invoke every matching handler, except one registered under
    /// `sender` itself -- a connection never gets its own `put` echoed back.
    fn dispatch(&self, msg: &Message, sender: Option<Connection>) {
        let handlers = self.handlers.lock().unwrap().clone();
        for entry in handlers.iter() {
            if entry.connection.is_some() && entry.connection == sender {
                continue;
            }
            if (entry.predicate)(msg) {
                (entry.handler)(msg);
            }
        }
    }
}

/// A node's connection to a CAN segment: alias arbitration, the alias
/// registry, message encoding/decoding, and handler dispatch, all driven
/// through one [`Executor`].
///
/// Cheap to clone -- every field is an `Arc` (or, for `node_id`, a `Copy`
/// value) -- so a handle can be freely shared with the receiver thread and
/// with closures submitted to the executor.
pub struct Interface<C: Clock, E: Executor, F: FrameSink> {
    node_id: NodeId,
    aliases: Arc<AliasMap>,
    arbiter: Arc<Mutex<AliasArbiter<C>>>,
    builder: Arc<Mutex<MessageBuilder>>,
    sink: Arc<F>,
    executor: Arc<E>,
    handlers: Arc<HandlerRegistry>,
    arbitration_watchers: Arc<Mutex<Vec<Arc<dyn Fn(ArbiterEvent) + Send + Sync>>>>,
    disposed: Arc<AtomicBool>,
    next_connection_id: Arc<AtomicU64>,
}

impl<C: Clock, E: Executor, F: FrameSink> Clone for Interface<C, E, F> {
    fn clone(&self) -> Self {
        Self {
            node_id: self.node_id,
            aliases: self.aliases.clone(),
            arbiter: self.arbiter.clone(),
            builder: self.builder.clone(),
            sink: self.sink.clone(),
            executor: self.executor.clone(),
            handlers: self.handlers.clone(),
            arbitration_watchers: self.arbitration_watchers.clone(),
            disposed: self.disposed.clone(),
            next_connection_id: self.next_connection_id.clone(),
        }
    }
}

impl<C: Clock, E: Executor, F: FrameSink> Interface<C, E, F> {
    pub fn new(node_id: NodeId, clock: C, executor: E, sink: F) -> Self {
        Self {
            node_id,
            aliases: Arc::new(AliasMap::new()),
            arbiter: Arc::new(Mutex::new(AliasArbiter::new(node_id, clock))),
            builder: Arc::new(Mutex::new(MessageBuilder::new())),
            sink: Arc::new(sink),
            executor: Arc::new(executor),
            handlers: Arc::new(HandlerRegistry::new()),
            arbitration_watchers: Arc::new(Mutex::new(Vec::new())),
            disposed: Arc::new(AtomicBool::new(false)),
            next_connection_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Allocate a fresh [`Connection`] identity for an upper-layer client to
    /// pass as the `sender` of [`Interface::put`] and, optionally, to
    /// [`Interface::register_handler`].
    pub fn new_connection(&self) -> Connection {
        Connection(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The segment's alias registry. Shared with whatever owns the
    /// receiver thread, so watchers registered here see every learned
    /// mapping regardless of who drives `on_frame`.
    pub fn aliases(&self) -> Arc<AliasMap> {
        self.aliases.clone()
    }

    pub fn is_active(&self) -> bool {
        self.arbiter.lock().unwrap().is_active()
    }

    pub fn active_alias(&self) -> Option<u16> {
        self.arbiter.lock().unwrap().active_alias()
    }

    /// Register a handler, invoked once per matching inbound message in
    /// registration order alongside every other matching handler.
    ///
    /// `connection` is `Some` when this handler belongs to an upper-layer
    /// client identified by a [`Connection`] -- such a handler is skipped
    /// for any `put` whose `sender` is the same connection, so a client
    /// never receives its own message back as if it arrived from elsewhere.
    /// Pass `None` for a handler with no such identity (it sees every
    /// dispatched message, including loopback of its own `put`s).
    pub fn register_handler(&self, connection: Option<Connection>, predicate: Predicate, handler: Handler) -> HandlerId {
        self.handlers.register(connection, predicate, handler)
    }

    /// Observe alias-arbiter lifecycle events -- in particular
    /// [`ArbiterEvent::Relinquished`], the "upper layers notified via
    /// event" case the failure-semantics table calls for when an active
    /// alias collides and must be re-arbitrated.
    pub fn add_arbitration_watcher(&self, watcher: Arc<dyn Fn(ArbiterEvent) + Send + Sync>) {
        self.arbitration_watchers.lock().unwrap().push(watcher);
    }

    /// Send `msg`, or deliver it straight to local handlers without
    /// touching the wire if it's addressed to this node (loopback).
    ///
    /// `sender` identifies the upper-layer [`Connection`] submitting `msg`,
    /// if any; on loopback it is passed on to dispatch so a handler
    /// registered under that same connection doesn't see its own message
    /// echoed back (spec.md §6's connection contract).
    ///
    /// Runs inside a single executor task so that concurrent callers'
    /// frames reach the sink in the same order their `put` calls were
    /// submitted -- encoding on the caller's own thread first would let two
    /// callers race between resolving aliases and writing frames.
    pub fn put(&self, msg: Message, sender: Option<&Connection>) -> InterfaceResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(InterfaceError::Disposed);
        }
        let sender = sender.copied();
        let (result_tx, result_rx) = mpsc::channel();
        let this = self.clone();
        self.executor.run_and_wait(Box::new(move || {
            let result = this.send_now(&msg, sender);
            let _ = result_tx.send(result);
        }));
        result_rx.recv().unwrap_or(Err(InterfaceError::Disposed))
    }

    fn send_now(&self, msg: &Message, sender: Option<Connection>) -> InterfaceResult<()> {
        if msg.destination() == Some(self.node_id) {
            net_trace!("interface: looping {} back to local handlers", msg.mti());
            self.handlers.dispatch(msg, sender);
            return Ok(());
        }
        let frames = {
            let builder = self.builder.lock().unwrap();
            builder.process_message(msg, &self.aliases)?
        };
        for frame in frames {
            self.sink.send(frame)?;
        }
        Ok(())
    }

    /// Block until every task submitted to the executor so far -- in
    /// particular any outbound frames already queued -- has run. Implemented
    /// as a no-op task riding the executor's own FIFO ordering, so there is
    /// no separate queue to maintain.
    pub fn flush_send_queue(&self) {
        self.executor.run_and_wait(Box::new(|| {}));
    }

    /// Drive one step of alias arbitration. The caller is responsible for
    /// invoking this on a schedule fine enough to honor the arbiter's
    /// timing (the `250µs`/`200ms` steps) -- the arbitration timer is one of
    /// the concurrency model's named suspension points, owned by whoever
    /// calls this, not by the interface itself.
    pub fn poll_arbiter(&self) {
        let this = self.clone();
        self.executor.submit(Box::new(move || {
            let event = {
                let mut arbiter = this.arbiter.lock().unwrap();
                arbiter.poll()
            };
            if let Some(event) = event {
                this.handle_arbiter_event(event);
            }
        }));
    }

    /// Feed one inbound frame through alias learning, arbitration, and
    /// message decoding. Submitted to the executor rather than run inline,
    /// so a caller on the I/O thread never touches interface state directly.
    pub fn on_frame(&self, frame: CanFrame) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let this = self.clone();
        self.executor.submit(Box::new(move || this.process_frame(frame)));
    }

    fn process_frame(&self, frame: CanFrame) {
        self.aliases.process_frame(&frame);

        let event = {
            let mut arbiter = self.arbiter.lock().unwrap();
            arbiter.on_frame(&frame)
        };
        if let Some(event) = event {
            self.handle_arbiter_event(event);
        }

        let messages = {
            let mut builder = self.builder.lock().unwrap();
            builder.process_frame(&frame, &self.aliases)
        };
        if let Some(messages) = messages {
            for msg in &messages {
                self.handlers.dispatch(msg, None);
            }
        }
    }

    fn handle_arbiter_event(&self, event: ArbiterEvent) {
        if let ArbiterEvent::Emit(frame) = event {
            if let Err(err) = self.sink.send(frame) {
                net_debug!("interface: failed to emit arbitration frame: {err}");
                self.disposed.store(true, Ordering::Release);
            }
        }
        // The arbiter's own alias is never learned from an inbound frame --
        // we never feed our own AMD back through `process_frame` -- so the
        // alias registry needs telling directly once arbitration settles.
        if let Some(alias) = self.arbiter.lock().unwrap().active_alias() {
            self.aliases.insert(alias, self.node_id);
        }
        for watcher in self.arbitration_watchers.lock().unwrap().iter() {
            watcher(event);
        }
    }

    /// Spawn the dedicated I/O thread that blocks on the frame sink and
    /// hands every received frame to the executor. This is the one
    /// suspension point the concurrency model allows to live off the
    /// owner thread; the returned handle exits on its own once the sink
    /// closes.
    pub fn run_receiver(&self) -> std::thread::JoinHandle<()> {
        let this = self.clone();
        std::thread::Builder::new()
            .name("openlcb-iface-rx".to_string())
            .spawn(move || loop {
                match this.sink.recv() {
                    Ok(frame) => this.on_frame(frame),
                    Err(TransportError::Closed) => break,
                    Err(err) => {
                        net_debug!("interface: receiver transport error: {err}");
                        break;
                    }
                }
            })
            .expect("failed to spawn interface receiver thread")
    }

    /// Signal shutdown: pending inbound frames and outbound messages already
    /// queued on the executor still run to completion, then the executor
    /// drains and the frame sink is released. Every operation after this
    /// returns `Disposed`.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.sink.close();
        self.executor.dispose();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use openlcb_can::FakeClock;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{Receiver, Sender};

    /// An in-memory frame sink backed by two channels, so a test can wire
    /// two interfaces together without any real transport.
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

    fn test_interface(node_id: NodeId, sink: ChannelSink) -> Interface<FakeClock, InlineExecutor, ChannelSink> {
        Interface::new(node_id, FakeClock::new(), InlineExecutor, sink)
    }

    #[test]
    fn loopback_message_never_touches_the_sink() {
        let (sink, _unused) = ChannelSink::pair();
        let node = NodeId::from_u64(1);
        let iface = test_interface(node, sink);
        iface.aliases().insert(0x333, node);

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        iface.register_handler(
            None,
            Arc::new(|_msg: &Message| true),
            Arc::new(move |_msg: &Message| {
                received_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let msg = Message::ProtocolSupportInquiry { source: node, destination: node };
        iface.put(msg, None).unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connection_does_not_receive_its_own_loopback_put() {
        let (sink, _unused) = ChannelSink::pair();
        let node = NodeId::from_u64(1);
        let iface = test_interface(node, sink);
        iface.aliases().insert(0x333, node);

        let own_connection = iface.new_connection();
        let other_connection = iface.new_connection();

        let own_received = Arc::new(AtomicUsize::new(0));
        let own_received_clone = own_received.clone();
        iface.register_handler(
            Some(own_connection),
            Arc::new(|_msg: &Message| true),
            Arc::new(move |_msg: &Message| {
                own_received_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let other_received = Arc::new(AtomicUsize::new(0));
        let other_received_clone = other_received.clone();
        iface.register_handler(
            Some(other_connection),
            Arc::new(|_msg: &Message| true),
            Arc::new(move |_msg: &Message| {
                other_received_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let msg = Message::ProtocolSupportInquiry { source: node, destination: node };
        iface.put(msg, Some(&own_connection)).unwrap();

        assert_eq!(own_received.load(Ordering::SeqCst), 0);
        assert_eq!(other_received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn put_with_unknown_destination_alias_is_rejected() {
        let (sink, _unused) = ChannelSink::pair();
        let node = NodeId::from_u64(1);
        let iface = test_interface(node, sink);
        iface.aliases().insert(0x333, node);

        let msg = Message::Datagram {
            source: node,
            destination: NodeId::from_u64(2),
            payload: vec![1, 2, 3],
        };
        assert!(matches!(iface.put(msg, None), Err(InterfaceError::MessageBuilder(_))));
    }

    #[test]
    fn frames_round_trip_between_two_interfaces() {
        let (sink_a, sink_b) = ChannelSink::pair();
        let node_a = NodeId::from_u64(1);
        let node_b = NodeId::from_u64(2);
        let iface_a = test_interface(node_a, sink_a);
        let iface_b = test_interface(node_b, sink_b);

        iface_a.aliases().insert(0x333, node_a);
        iface_a.aliases().insert(0x444, node_b);
        iface_b.aliases().insert(0x333, node_a);
        iface_b.aliases().insert(0x444, node_b);

        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        iface_b.register_handler(
            None,
            Arc::new(|msg: &Message| matches!(msg, Message::Datagram { .. })),
            Arc::new(move |msg: &Message| {
                *received_clone.lock().unwrap() = Some(msg.clone());
            }),
        );

        let msg = Message::Datagram {
            source: node_a,
            destination: node_b,
            payload: vec![9, 8, 7],
        };
        iface_a.put(msg.clone(), None).unwrap();

        let frame = iface_b.sink.recv().unwrap();
        iface_b.process_frame(frame);

        assert_eq!(*received.lock().unwrap(), Some(msg));
    }

    #[test]
    fn disposed_interface_rejects_put() {
        let (sink, _unused) = ChannelSink::pair();
        let node = NodeId::from_u64(1);
        let iface = test_interface(node, sink);
        iface.dispose();

        let msg = Message::InitializationComplete { source: node };
        assert!(matches!(iface.put(msg, None), Err(InterfaceError::Disposed)));
    }

    #[test]
    fn poll_arbiter_runs_without_panicking() {
        let (sink, _unused) = ChannelSink::pair();
        let node = NodeId::from_u64(42);
        let iface = test_interface(node, sink);
        assert!(!iface.is_active());
        for _ in 0..5 {
            iface.poll_arbiter();
        }
    }
}
