//! Transport session
//!
//! Exact-length reads and writes over an [`InstrumentLink`]. Reads poll
//! `waiting()` and only pull what is waiting, so a read never blocks
//! past its deadline and never consumes bytes meant for a later exchange.
//! Bytes read past a line terminator are kept in `pending` and served first.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use super::capabilities::TERMINATOR;
use super::error::printable;
use super::link::InstrumentLink;
use super::serial::SerialLink;
use super::ProtocolError;

/// Poll interval while waiting for bytes
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Owner of the byte link to one instrument
pub struct TransportSession {
    channel: Option<Box<dyn InstrumentLink>>,
    pending: VecDeque<u8>,
    tx_bytes: u64,
    rx_bytes: u64,
}

impl TransportSession {
    /// Open a serial port, configure it 8N1 and discard stale input
    pub fn open(port: &str, baud_rate: u32) -> Result<Self, ProtocolError> {
        let serial = SerialLink::open(port, baud_rate)?;
        tracing::info!(port, baud_rate, "serial link open");
        Ok(Self::new(Box::new(serial)))
    }

    /// Wrap an already open channel (simulator, test double, ...)
    pub fn new(channel: Box<dyn InstrumentLink>) -> Self {
        Self {
            channel: Some(channel),
            pending: VecDeque::new(),
            tx_bytes: 0,
            rx_bytes: 0,
        }
    }

    /// Check whether the link is still open
    pub fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// Cumulative (tx, rx) byte counters
    pub fn counters(&self) -> (u64, u64) {
        (self.tx_bytes, self.rx_bytes)
    }

    fn channel(&mut self) -> Result<&mut Box<dyn InstrumentLink>, ProtocolError> {
        self.channel.as_mut().ok_or(ProtocolError::NotConnected)
    }

    /// Write all bytes and flush. `command` is only used for error reporting.
    pub fn write_exact(&mut self, command: char, bytes: &[u8]) -> Result<(), ProtocolError> {
        let channel = self.channel()?;
        channel
            .write_all(bytes)
            .and_then(|_| channel.flush())
            .map_err(|source| ProtocolError::LinkWriteFailure { command, source })?;
        self.tx_bytes = self.tx_bytes.saturating_add(bytes.len() as u64);
        tracing::trace!(command = %command, data = %printable(bytes), ">>");
        Ok(())
    }

    /// Pull whatever the channel has waiting into `pending`, without blocking.
    /// Returns the number of bytes pulled.
    fn fill_pending(&mut self, max: usize) -> Result<usize, ProtocolError> {
        let channel = self.channel.as_mut().ok_or(ProtocolError::NotConnected)?;
        let available = channel.waiting()?;
        if available == 0 || max == 0 {
            return Ok(0);
        }
        let mut buf = vec![0u8; available.min(max)];
        let n = match channel.read(&mut buf) {
            Ok(n) => n,
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                0
            }
            Err(e) => return Err(e.into()),
        };
        self.pending.extend(&buf[..n]);
        self.rx_bytes = self.rx_bytes.saturating_add(n as u64);
        Ok(n)
    }

    /// Read exactly `n` bytes.
    ///
    /// On timeout the bytes that did arrive are returned inside
    /// [`ProtocolError::TimedOut`]; they are never padded or retried.
    pub fn read_exact(
        &mut self,
        command: char,
        n: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, ProtocolError> {
        let start = Instant::now();
        loop {
            if self.pending.len() >= n {
                let out: Vec<u8> = self.pending.drain(..n).collect();
                tracing::trace!(command = %command, data = %printable(&out), "<<");
                return Ok(out);
            }
            let wanted = n - self.pending.len();
            if self.fill_pending(wanted)? == 0 {
                if start.elapsed() > timeout {
                    let received: Vec<u8> = self.pending.drain(..).collect();
                    tracing::warn!(
                        command = %command,
                        expected = n,
                        got = received.len(),
                        "read timed out"
                    );
                    return Err(ProtocolError::TimedOut {
                        command,
                        expected: n,
                        received,
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Read one CR-LF terminated line, terminator included.
    ///
    /// Reading stops early once `limit` bytes are buffered without a
    /// terminator; the caller then sees an over-long line and reports the
    /// length mismatch instead of waiting for the rest of a runaway reply.
    pub fn read_line(
        &mut self,
        command: char,
        timeout: Duration,
        limit: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        let start = Instant::now();
        let mut scanned = 0;
        loop {
            if let Some(end) = find_terminator(&self.pending, scanned) {
                let out: Vec<u8> = self.pending.drain(..end).collect();
                tracing::trace!(command = %command, data = %printable(&out), "<<");
                return Ok(out);
            }
            scanned = self.pending.len().saturating_sub(1);
            if self.pending.len() >= limit {
                let out: Vec<u8> = self.pending.drain(..).collect();
                tracing::trace!(command = %command, data = %printable(&out), "<< (limit)");
                return Ok(out);
            }
            let room = limit - self.pending.len();
            if self.fill_pending(room)? == 0 {
                if start.elapsed() > timeout {
                    let received: Vec<u8> = self.pending.drain(..).collect();
                    tracing::warn!(
                        command = %command,
                        got = received.len(),
                        "no line terminator before timeout"
                    );
                    return Err(ProtocolError::TimedOut {
                        command,
                        expected: limit,
                        received,
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Number of bytes waiting, buffered here or in the channel
    pub fn bytes_available(&mut self) -> Result<usize, ProtocolError> {
        let waiting = self.channel()?.waiting()?;
        Ok(self.pending.len() + waiting)
    }

    /// Discard everything currently buffered without blocking.
    /// Returns the number of bytes thrown away.
    pub fn drain_available(&mut self) -> Result<usize, ProtocolError> {
        let mut drained = self.pending.len();
        self.pending.clear();
        loop {
            let n = self.fill_pending(usize::MAX)?;
            if n == 0 {
                break;
            }
            drained += n;
            self.pending.clear();
        }
        if drained > 0 {
            tracing::debug!(drained, "discarded unsolicited bytes");
        }
        Ok(drained)
    }

    /// Release the link. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            self.pending.clear();
            tracing::info!("link closed");
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Index one past the end of the first CR-LF at or after `from`
fn find_terminator(buf: &VecDeque<u8>, from: usize) -> Option<usize> {
    let len = buf.len();
    if len < TERMINATOR.len() {
        return None;
    }
    (from..len - 1)
        .find(|&i| buf[i] == TERMINATOR[0] && buf[i + 1] == TERMINATOR[1])
        .map(|i| i + TERMINATOR.len())
}
