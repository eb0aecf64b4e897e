//! Command exchanges
//!
//! Echo-verified parameter sets, status parsing and the short
//! query/acknowledge commands.

use serde::{Deserialize, Serialize};

use super::capabilities::TERMINATOR;
use super::commands::{Command, StoredWave};
use super::hex::{format_word, is_upper_hex, parse_fixed_width, parse_spaced};
use super::parameters::{Cached, Parameter};
use super::session::{Session, SessionState};
use super::ProtocolError;

/// Length of the `<code>:XXXX?` header echoed after a set command
const ECHO_HEADER_LEN: usize = 7;
/// Length of the `XXXX\r\n` value echo
const ECHO_VALUE_LEN: usize = 6;
/// `M` and `m` replies: 8 hex digits and the terminator
const COUNTER_REPLY_LEN: usize = 10;
/// Acknowledge of `S` and `T`
const OK_ACK: &[u8] = b"OK\r\n";
/// Length of the `Z` and `W` acknowledge lines
const ACK_LINE_LEN: usize = 4;

/// One parsed status line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// The line as received, terminator stripped
    pub raw: String,
    /// Field values in wire order
    pub fields: Vec<(Parameter, u32)>,
}

impl StatusRecord {
    /// Value of one field, if the status line carries it
    pub fn get(&self, parameter: Parameter) -> Option<u32> {
        self.fields
            .iter()
            .find(|(p, _)| *p == parameter)
            .map(|(_, v)| *v)
    }
}

/// What a `clear` asks of the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    /// Only the hardware counters were cleared
    Hardware,
    /// Soft clear: the caller's accumulated total must be zeroed too
    HardwareAndTotals,
}

impl ClearScope {
    /// Whether the caller must zero its accumulated total
    pub fn zero_totals(self) -> bool {
        self == ClearScope::HardwareAndTotals
    }
}

fn is_echo_header(header: &[u8], code: u8) -> bool {
    header.len() == ECHO_HEADER_LEN
        && header[0] == code
        && header[1] == b':'
        && is_upper_hex(&header[2..6])
        && header[6] == b'?'
}

impl Session {
    fn unsupported(&self, what: &'static str) -> ProtocolError {
        ProtocolError::Unsupported {
            what,
            model: self.caps.identification,
        }
    }

    /// Check a value against the model's bound for `parameter`, before any I/O
    fn validate(&self, parameter: Parameter, value: u32) -> Result<(), ProtocolError> {
        let bound = self
            .caps
            .bound(parameter)
            .ok_or_else(|| self.unsupported(parameter.name()))?;
        if !bound.contains(value) {
            return Err(ProtocolError::ValueOutOfRange {
                parameter: parameter.name(),
                value,
                min: bound.min,
                max: bound.max,
            });
        }
        Ok(())
    }

    /// Set a parameter with the two-phase echo-verified exchange.
    ///
    /// The value is validated before anything is written. An unexpected
    /// header echo leaves the cache alone; a wrong value echo forgets every
    /// cached parameter. Success marks only `parameter` as known.
    pub fn set_parameter(&mut self, parameter: Parameter, value: u32) -> Result<(), ProtocolError> {
        self.validate(parameter, value)?;
        self.guarded(Command::Set(parameter), |s, code| {
            s.echo_set(code, parameter, value as u16)
        })
    }

    fn echo_set(&mut self, code: char, parameter: Parameter, value: u16) -> Result<(), ProtocolError> {
        let timeout = self.timeouts.command;

        self.send_command(code)?;
        let header = self.transport.read_exact(code, ECHO_HEADER_LEN, timeout)?;
        if !is_echo_header(&header, code as u8) {
            return Err(ProtocolError::UnexpectedEcho {
                command: code,
                received: header,
            });
        }

        let word = format_word(value);
        self.transport.write_exact(code, word.as_bytes())?;
        let expected = [word.as_bytes(), TERMINATOR].concat();
        let echo = match self.transport.read_exact(code, ECHO_VALUE_LEN, timeout) {
            Ok(echo) => echo,
            Err(e) => {
                // the value may or may not have been latched
                self.params.invalidate_all();
                return Err(e);
            }
        };
        if echo != expected {
            self.params.invalidate_all();
            return Err(ProtocolError::EchoFailure {
                command: code,
                sent: word,
                received: echo,
            });
        }

        self.params.set_known(parameter, value as u32);
        tracing::debug!(%parameter, value, "parameter set");
        Ok(())
    }

    /// Set the waveform amplitude (`K`)
    pub fn set_amplitude(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_parameter(Parameter::Amplitude, value)
    }

    /// Set the number of cycles to acquire (`N`)
    pub fn set_cycle_number(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_parameter(Parameter::CycleNumber, value)
    }

    /// Set the time base divisor (`U`)
    pub fn set_time_base(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_parameter(Parameter::TimeBase, value)
    }

    /// Set the channel step divisor (`P`, MDAQ209)
    pub fn set_step(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_parameter(Parameter::Step, value)
    }

    /// Set the offset (`O`). Vestigial on both models.
    pub fn set_offset(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_parameter(Parameter::Offset, value)
    }

    /// Set the central channel (`Q`, MDAQ107)
    pub fn set_central_channel(&mut self, value: u32) -> Result<(), ProtocolError> {
        self.set_parameter(Parameter::CentralChannel, value)
    }

    /// Set the gate start (`G`) and end (`g`) channels.
    ///
    /// Both values are validated before the first byte is sent.
    pub fn set_gate(&mut self, start: u32, end: u32) -> Result<(), ProtocolError> {
        self.validate(Parameter::GateStart, start)?;
        self.validate(Parameter::GateEnd, end)?;
        if self.caps.gate_ordered && start > end {
            return Err(ProtocolError::ValueOutOfRange {
                parameter: Parameter::GateStart.name(),
                value: start,
                min: 0,
                max: end,
            });
        }
        self.set_parameter(Parameter::GateStart, start)?;
        self.set_parameter(Parameter::GateEnd, end)
    }

    /// Read and parse the status line into the parameter cache
    pub fn get_status(&mut self) -> Result<StatusRecord, ProtocolError> {
        self.guarded(Command::Status, |s, code| {
            let expected = s.caps.status_line_len();
            let line = s.query_line(Command::Status, code, expected)?;
            let body = &line[..expected - TERMINATOR.len()];
            let malformed = |reason: String| ProtocolError::UnexpectedProtocol {
                command: code,
                reason,
                received: line.clone(),
            };

            let text = std::str::from_utf8(body)
                .map_err(|_| malformed("status line is not ASCII".to_string()))?;
            let values = parse_spaced(text).map_err(|e| malformed(e.to_string()))?;
            if values.len() != s.caps.status_fields.len() {
                return Err(malformed(format!(
                    "{} fields, expected {}",
                    values.len(),
                    s.caps.status_fields.len()
                )));
            }

            let fields: Vec<(Parameter, u32)> = s
                .caps
                .status_fields
                .iter()
                .map(|(p, _)| *p)
                .zip(values)
                .collect();
            for (parameter, value) in &fields {
                s.params.set_known(*parameter, *value);
            }
            tracing::debug!(status = text, "status read");
            Ok(StatusRecord {
                raw: text.to_string(),
                fields,
            })
        })
    }

    /// Step divisor needed to size a spectrum dump.
    ///
    /// The newer model groups channels by its step register, so a dump can
    /// only be sized once the step is known. When it is not cached, one
    /// status read is issued first; otherwise no extra traffic happens.
    pub(crate) fn ensure_step_known(&mut self) -> Result<u32, ProtocolError> {
        if !self.caps.has_step {
            return Ok(1);
        }
        if self.params.get(Parameter::Step) == Cached::Unknown {
            tracing::debug!("step unknown, reading status before dump");
            self.get_status()?;
        }
        match self.params.get(Parameter::Step) {
            Cached::Known(0) => Err(self.unsupported("spectrum dump with step 0")),
            Cached::Known(step) => Ok(step),
            Cached::Unknown => Err(self.unsupported("spectrum dump without a step value")),
        }
    }

    fn query_counter(&mut self, command: Command) -> Result<u32, ProtocolError> {
        self.guarded(command, |s, code| {
            let line = s.query_line(command, code, COUNTER_REPLY_LEN)?;
            let digits = &line[..COUNTER_REPLY_LEN - TERMINATOR.len()];
            let values = parse_fixed_width(digits, 8).map_err(|e| ProtocolError::UnexpectedProtocol {
                command: code,
                reason: e.to_string(),
                received: line.clone(),
            })?;
            Ok(values[0])
        })
    }

    /// Cycles acquired since the last clear (`M`)
    pub fn get_cycle_number(&mut self) -> Result<u32, ProtocolError> {
        let cycles = self.query_counter(Command::CycleCounter)?;
        self.params.set_known(Parameter::CycleCounter, cycles);
        Ok(cycles)
    }

    /// Sum of the counts between the gate channels (`m`, MDAQ209)
    pub fn get_sum_in_gate(&mut self) -> Result<u32, ProtocolError> {
        if !self.caps.has_gate_sum {
            return Err(self.unsupported("sum in gate"));
        }
        self.query_counter(Command::SumInGate)
    }

    fn run_command(&mut self, command: Command) -> Result<(), ProtocolError> {
        self.guarded(command, |s, code| {
            s.send_command(code)?;
            let ack = s.transport.read_exact(code, OK_ACK.len(), s.timeouts.command)?;
            if ack != OK_ACK {
                return Err(ProtocolError::UnexpectedProtocol {
                    command: code,
                    reason: "expected OK".to_string(),
                    received: ack,
                });
            }
            Ok(())
        })
    }

    /// Start counting (`S`). A reset session moves to `Acquiring`.
    pub fn start(&mut self) -> Result<(), ProtocolError> {
        self.run_command(Command::Start)?;
        if self.state == SessionState::Ready {
            self.state = SessionState::Acquiring;
        }
        tracing::debug!("acquisition started");
        Ok(())
    }

    /// Stop counting (`T`)
    pub fn stop(&mut self) -> Result<(), ProtocolError> {
        self.run_command(Command::Stop)?;
        if self.state == SessionState::Acquiring {
            self.state = SessionState::Ready;
        }
        tracing::debug!("acquisition stopped");
        Ok(())
    }

    /// Clear the hardware counters and cycle counter (`Z`).
    ///
    /// A soft clear additionally tells the caller to zero its accumulated
    /// total; the session's own binary running total is left alone.
    pub fn clear(&mut self, soft: bool) -> Result<ClearScope, ProtocolError> {
        self.guarded(Command::Clear, |s, code| {
            s.query_line(Command::Clear, code, ACK_LINE_LEN).map(|_| ())
        })?;
        self.params.set_known(Parameter::CycleCounter, 0);
        tracing::info!(soft, "counters cleared");
        Ok(if soft {
            ClearScope::HardwareAndTotals
        } else {
            ClearScope::Hardware
        })
    }

    /// Select one of the waveforms stored in firmware (`L`, MDAQ209).
    /// The instrument sends no reply.
    pub fn select_wave(&mut self, wave: StoredWave) -> Result<(), ProtocolError> {
        if !self.caps.has_wave_select {
            return Err(self.unsupported("stored waveform select"));
        }
        self.guarded(Command::SelectWave, |s, code| {
            s.transport
                .write_exact(code, &[code as u8, wave.selector()])
        })?;
        tracing::debug!(?wave, "stored waveform selected");
        Ok(())
    }
}
