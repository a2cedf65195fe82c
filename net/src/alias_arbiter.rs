//! The Check-ID/Reserve-ID arbitration state machine a node runs to claim
//! one CAN alias on a fresh segment.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use openlcb_core::{net_debug, net_trace, NodeId};

use crate::wire::can::{CanFrame, ControlCode};

const CID_STEP: Duration = Duration::from_micros(250);
const RID_QUIET: Duration = Duration::from_millis(200);

/// A source of monotonic time, injected so arbitration timing can be driven
/// by a fake clock in tests instead of sleeping on a wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real clock, backed by [`std::time::Instant::now`].
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually-advanced clock for deterministic arbitration tests.
pub struct FakeClock(Mutex<Instant>);

impl FakeClock {
    pub fn new() -> Self {
        Self(Mutex::new(Instant::now()))
    }

    pub fn advance(&self, delta: Duration) {
        let mut t = self.0.lock().unwrap();
        *t += delta;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.0.lock().unwrap()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    Cid1Sent,
    Cid2Sent,
    Cid3Sent,
    Cid4Sent,
    RidSent,
    Active,
}

/// Something the interface needs to act on as a result of driving the
/// arbiter: emit a frame, or notice that a previously-active alias was
/// relinquished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterEvent {
    /// Emit this frame onto the bus now.
    Emit(CanFrame),
    /// A previously-claimed alias was relinquished due to a collision;
    /// arbitration has restarted with a fresh candidate.
    Relinquished(u16),
}

/// A small xorshift generator seeded from the node's own 48 bits. Used only
/// to pick the next candidate alias -- not a cryptographic generator, and
/// not shared state, so a plain seeded stream is all this needs.
struct AliasRng(u64);

impl AliasRng {
    fn new(seed: NodeId) -> Self {
        let seed = seed.as_u64() ^ 0xA5A5_A5A5_A5A5_A5A5;
        Self(if seed == 0 { 0xD1CE_BEEF } else { seed })
    }

    fn next_u16(&mut self) -> u16 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        (x & 0xFFFF) as u16
    }

    /// Draw a candidate alias in `[0x001, 0xFFE]`, redrawing on `0x000` and
    /// `0xFFF`.
    fn next_candidate(&mut self) -> u16 {
        loop {
            let v = self.next_u16() & 0x0FFF;
            if v != 0x000 && v != 0xFFF {
                return v;
            }
        }
    }
}

/// Drives the Check-ID/Reserve-ID arbitration protocol used to claim one
/// CAN alias for a node on a fresh segment.
///
/// Isolated from message-plane logic: it consumes raw CAN frames -- which
/// may arrive before a [`MessageBuilder`](crate::MessageBuilder) can
/// synthesize an application message out of them -- and emits frames
/// directly via [`poll`](Self::poll) and [`on_frame`](Self::on_frame).
pub struct AliasArbiter<C: Clock> {
    node_id: NodeId,
    clock: C,
    rng: AliasRng,
    state: State,
    candidate: u16,
    state_entered_at: Instant,
}

impl<C: Clock> AliasArbiter<C> {
    pub fn new(node_id: NodeId, clock: C) -> Self {
        let mut rng = AliasRng::new(node_id);
        let candidate = rng.next_candidate();
        let now = clock.now();
        Self {
            node_id,
            clock,
            rng,
            state: State::Initial,
            candidate,
            state_entered_at: now,
        }
    }

    /// The alias currently being claimed or held.
    pub fn candidate(&self) -> u16 {
        self.candidate
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// The alias this node holds, once arbitration has completed.
    pub fn active_alias(&self) -> Option<u16> {
        self.is_active().then_some(self.candidate)
    }

    fn enter(&mut self, state: State) {
        self.state = state;
        self.state_entered_at = self.clock.now();
    }

    fn restart(&mut self) {
        self.candidate = self.rng.next_candidate();
        self.enter(State::Initial);
        net_debug!("alias arbiter: restarting with candidate {:03X}", self.candidate);
    }

    /// Advance the state machine. Returns a frame to emit if the current
    /// state's timer (or the unconditional first step) is due; `None` if
    /// nothing is due yet, including once the node has reached `Active`.
    pub fn poll(&mut self) -> Option<ArbiterEvent> {
        let elapsed = self.clock.now().saturating_duration_since(self.state_entered_at);
        match self.state {
            State::Initial => {
                self.enter(State::Cid1Sent);
                Some(ArbiterEvent::Emit(CanFrame::control(ControlCode::CheckId1, self.candidate)))
            }
            State::Cid1Sent if elapsed >= CID_STEP => {
                self.enter(State::Cid2Sent);
                Some(ArbiterEvent::Emit(CanFrame::control(ControlCode::CheckId2, self.candidate)))
            }
            State::Cid2Sent if elapsed >= CID_STEP => {
                self.enter(State::Cid3Sent);
                Some(ArbiterEvent::Emit(CanFrame::control(ControlCode::CheckId3, self.candidate)))
            }
            State::Cid3Sent if elapsed >= CID_STEP => {
                self.enter(State::Cid4Sent);
                Some(ArbiterEvent::Emit(CanFrame::control(ControlCode::CheckId4, self.candidate)))
            }
            State::Cid4Sent if elapsed >= RID_QUIET => {
                self.enter(State::RidSent);
                Some(ArbiterEvent::Emit(CanFrame::control(ControlCode::ReserveId, self.candidate)))
            }
            State::RidSent => {
                let alias = self.candidate;
                self.enter(State::Active);
                net_debug!("alias arbiter: claimed alias {:03X}, announcing", alias);
                Some(ArbiterEvent::Emit(CanFrame::control_with_payload(
                    ControlCode::AliasMapDefinition,
                    alias,
                    self.node_id.as_bytes(),
                )))
            }
            _ => None,
        }
    }

    /// Feed an observed frame to the arbiter.
    ///
    /// Pre-`Active`, any frame whose source alias collides with our
    /// candidate restarts arbitration with a fresh candidate. Once
    /// `Active`, a CID* frame targeting our alias is defended with a RID;
    /// any other frame sharing our alias (an RID or AMD claiming it, or
    /// simply a frame arriving with our own alias as its source) forces us
    /// to relinquish and re-arbitrate.
    pub fn on_frame(&mut self, frame: &CanFrame) -> Option<ArbiterEvent> {
        if frame.source_alias() != self.candidate {
            return None;
        }
        match self.state {
            State::Active => {
                if frame.is_check_id1() || frame.is_check_id2() || frame.is_check_id3() || frame.is_check_id4() {
                    net_trace!("alias arbiter: defending active alias {:03X}", self.candidate);
                    Some(ArbiterEvent::Emit(CanFrame::control(ControlCode::ReserveId, self.candidate)))
                } else {
                    let relinquished = self.candidate;
                    net_debug!("alias arbiter: relinquishing alias {:03X} to collision", relinquished);
                    self.restart();
                    Some(ArbiterEvent::Relinquished(relinquished))
                }
            }
            _ => {
                net_trace!("alias arbiter: candidate {:03X} collided pre-active, restarting", self.candidate);
                self.restart();
                None
            }
        }
    }
}
