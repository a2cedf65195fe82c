//! The frame-sink boundary between the core and a physical CAN transport.
//!
//! This is the host-side analogue of a token-pair device abstraction: since
//! a threaded host process doesn't need zero-copy borrow discipline the way
//! an embedded `no_std` device loop does, the contract collapses to a
//! blocking/non-blocking pair of methods plus an idempotent close.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::wire::can::CanFrame;
use crate::wire::gridconnect;
use openlcb_core::net_trace;

/// Errors a [`FrameSink`] may report. These poison the owning interface
/// (see the error-handling design's transport-error row) rather than being
/// retried internally.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
}

/// The bottom of the core: an opaque CAN frame transport.
///
/// `send` is expected not to block on another interface-owned operation
/// (see the concurrency model's suspension-point list); `recv` is allowed
/// to block, since it's meant to run on a dedicated I/O thread that hands
/// parsed frames to the interface's executor. `close` is idempotent.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: CanFrame) -> Result<(), TransportError>;
    fn recv(&self) -> Result<CanFrame, TransportError>;
    fn close(&self);
}

/// Adapts any `Read + Write` byte transport (a serial port, a TCP socket)
/// to [`FrameSink`] by speaking the GridConnect ASCII envelope over it.
pub struct GridConnectSink<W> {
    writer: Mutex<W>,
    reader: Mutex<BufReader<Box<dyn Read + Send>>>,
    pending: Mutex<VecDeque<CanFrame>>,
    closed: AtomicBool,
}

impl<W: Write + Send> GridConnectSink<W> {
    pub fn new(writer: W, reader: impl Read + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(BufReader::new(Box::new(reader))),
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl<W: Write + Send> FrameSink for GridConnectSink<W> {
    fn send(&self, frame: CanFrame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let text = gridconnect::format(&frame);
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Blocks on a line of input; a line carries zero or more concatenated
    /// GridConnect frames (spec.md's "multiple frames concatenated with no
    /// separator are accepted on input"), which are buffered and handed out
    /// one per call. A line that doesn't parse as well-formed GridConnect is
    /// discarded whole (logged) and the next line is tried, per the
    /// malformed-input failure semantics.
    fn recv(&self) -> Result<CanFrame, TransportError> {
        loop {
            if let Some(frame) = self.pending.lock().unwrap().pop_front() {
                return Ok(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            let mut line = String::new();
            let n = {
                let mut reader = self.reader.lock().unwrap();
                reader.read_line(&mut line)?
            };
            if n == 0 {
                self.closed.store(true, Ordering::Release);
                return Err(TransportError::Closed);
            }
            match gridconnect::try_parse(&line) {
                Ok(frames) if !frames.is_empty() => {
                    self.pending.lock().unwrap().extend(frames);
                }
                Ok(_) => continue,
                Err(err) => {
                    net_trace!("gridconnect sink: discarding malformed line: {err}");
                    continue;
                }
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;
    use openlcb_core::Mti;

    #[test]
    fn recv_yields_each_frame_from_a_line_with_several_concatenated() {
        let a = CanFrame::message(0, Mti::INITIALIZATION_COMPLETE, 0x001, &[]);
        let b = CanFrame::message(0, Mti::VERIFIED_NODE_ID, 0x002, &[1, 2]);
        let line = format!("{}{}\n", gridconnect::format(&a), gridconnect::format(&b));

        let sink = GridConnectSink::new(Vec::new(), Cursor::new(line.into_bytes()));

        let first = sink.recv().unwrap();
        let second = sink.recv().unwrap();
        assert_eq!(first.header(), a.header());
        assert_eq!(second.header(), b.header());

        // The reader is now exhausted; the next call observes EOF and closes.
        assert!(matches!(sink.recv(), Err(TransportError::Closed)));
    }

    #[test]
    fn recv_discards_a_malformed_line_and_continues() {
        let good = CanFrame::message(0, Mti::INITIALIZATION_COMPLETE, 0x333, &[]);
        let input = format!("garbage\n{}\n", gridconnect::format(&good));

        let sink = GridConnectSink::new(Vec::new(), Cursor::new(input.into_bytes()));
        let frame = sink.recv().unwrap();
        assert_eq!(frame.header(), good.header());
    }
}
