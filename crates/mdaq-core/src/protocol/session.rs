//! Instrument session
//!
//! A [`Session`] owns the one [`TransportSession`] to an instrument together
//! with its capability table, parameter cache and advisory state. The command,
//! transfer and reset exchanges are implemented as `impl Session` blocks in
//! their own modules and all go through [`Session::guarded`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::capabilities::{HardwareCapabilities, Model};
use super::commands::Command;
use super::parameters::HardwareParameters;
use super::link::InstrumentLink;
use super::transport::TransportSession;
use super::ProtocolError;
use crate::config::SessionConfig;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Link not (yet) verified by a reset, or closed
    Disconnected,
    /// Reset succeeded and no protocol violation since
    Ready,
    /// A protocol violation happened; only `reset()` is accepted
    ParameterUnknown,
    /// `start()` was acknowledged. Advisory, the hardware counts on its own.
    Acquiring,
}

/// Fixed per-session timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Command/acknowledge exchanges and short replies
    pub command: Duration,
    /// Spectrum dumps and waveform transfers
    pub bulk: Duration,
}

impl Timeouts {
    /// Defaults for a model: its command timeout, 10 s for bulk transfers
    pub fn for_model(model: Model) -> Self {
        Self {
            command: Duration::from_millis(model.capabilities().default_timeout_ms),
            bulk: Duration::from_millis(crate::config::DEFAULT_BULK_TIMEOUT_MS),
        }
    }
}

/// Connection to one MDAQ instrument
pub struct Session {
    pub(crate) transport: TransportSession,
    pub(crate) caps: &'static HardwareCapabilities,
    pub(crate) params: HardwareParameters,
    pub(crate) state: SessionState,
    pub(crate) timeouts: Timeouts,
    /// Element-wise sum of every binary dump since the caller last zeroed it
    pub(crate) running_total: Vec<u64>,
}

impl Session {
    /// Open the serial port named in the config
    pub fn open(config: &SessionConfig) -> Result<Self, ProtocolError> {
        let transport = TransportSession::open(&config.port_name, config.baud_rate)?;
        Ok(Self::new(transport, config.model, config.timeouts()))
    }

    /// Build a session over an open transport
    pub fn new(transport: TransportSession, model: Model, timeouts: Timeouts) -> Self {
        let caps = model.capabilities();
        Self {
            transport,
            caps,
            params: HardwareParameters::new(caps),
            state: SessionState::Disconnected,
            timeouts,
            running_total: Vec::new(),
        }
    }

    /// Build a session over any link with the model's default timeouts
    pub fn with_link(link: Box<dyn InstrumentLink>, model: Model) -> Self {
        Self::new(
            TransportSession::new(link),
            model,
            Timeouts::for_model(model),
        )
    }

    /// Hardware generation
    pub fn model(&self) -> Model {
        self.caps.model
    }

    /// Capability table of the connected generation
    pub fn capabilities(&self) -> &'static HardwareCapabilities {
        self.caps
    }

    /// Parameter cache
    pub fn parameters(&self) -> &HardwareParameters {
        &self.params
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session timeouts
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Cumulative (tx, rx) byte counters of the link
    pub fn counters(&self) -> (u64, u64) {
        self.transport.counters()
    }

    /// Running total of all binary dumps since the last
    /// [`reset_running_total`](Self::reset_running_total). Empty before the
    /// first binary dump.
    pub fn running_total(&self) -> &[u64] {
        &self.running_total
    }

    /// Zero the binary dump running total. The protocol layer never does
    /// this on its own, not even on a soft clear.
    pub fn reset_running_total(&mut self) {
        self.running_total.clear();
        tracing::debug!("binary running total cleared");
    }

    /// The caller saw the cycle counter reach its target
    pub fn mark_cycles_complete(&mut self) {
        if self.state == SessionState::Acquiring {
            self.state = SessionState::Ready;
        }
    }

    /// Release the link. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.transport.close();
        self.state = SessionState::Disconnected;
    }

    /// Flag the link as untrusted after a panic or desync detected by a caller
    pub(crate) fn mark_desync(&mut self, command: char, err: &dyn std::fmt::Display) {
        if self.state != SessionState::ParameterUnknown {
            tracing::warn!(command = %command, error = %err, "link desynchronized, reset required");
        }
        self.state = SessionState::ParameterUnknown;
    }

    pub(crate) fn timeout_for(&self, command: Command) -> Duration {
        if command.is_bulk() {
            self.timeouts.bulk
        } else {
            self.timeouts.command
        }
    }

    /// Run one wire exchange.
    ///
    /// Refuses to touch the wire while the link is untrusted (only a reset may
    /// run then), and moves the session to `ParameterUnknown` when the
    /// exchange fails in a way that leaves the byte stream out of step.
    pub(crate) fn guarded<T>(
        &mut self,
        command: Command,
        op: impl FnOnce(&mut Self, char) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let code = command.code(self.caps.model);
        if !self.transport.is_open() {
            return Err(ProtocolError::NotConnected);
        }
        if self.state == SessionState::ParameterUnknown && command != Command::Reset {
            return Err(ProtocolError::ResetRequired { command: code });
        }
        let result = op(self, code);
        if let Err(ref e) = result {
            if e.is_desync() {
                self.mark_desync(code, e);
            }
        }
        result
    }

    /// Write the single command byte
    pub(crate) fn send_command(&mut self, code: char) -> Result<(), ProtocolError> {
        self.transport.write_exact(code, &[code as u8])
    }

    /// Send a command byte and read back a line that must be exactly
    /// `expected` bytes long, terminator included.
    pub(crate) fn query_line(
        &mut self,
        command: Command,
        code: char,
        expected: usize,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.send_command(code)?;
        let timeout = self.timeout_for(command);
        let line = self.transport.read_line(code, timeout, expected + 1)?;
        if line.len() != expected {
            return Err(ProtocolError::UnexpectedReplyLength {
                command: code,
                expected,
                received: line,
            });
        }
        Ok(line)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
