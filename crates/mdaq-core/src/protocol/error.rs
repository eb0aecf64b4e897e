//! Protocol errors

use thiserror::Error;

/// Render received bytes for error messages, escaping control characters
/// so CR/LF and binary garbage stay visible in logs.
pub(crate) fn printable(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for b in bytes {
        out.extend(std::ascii::escape_default(*b).map(char::from));
    }
    out.push('"');
    out
}

/// Errors that can occur while talking to an MDAQ instrument.
///
/// Every variant produced after I/O began names the command byte that was in
/// flight and carries the exact bytes that came back, so a failing exchange on
/// a live instrument can be diagnosed from the log line alone.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serial port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("Write of command '{command}' failed: {source}")]
    LinkWriteFailure {
        command: char,
        #[source]
        source: std::io::Error,
    },

    #[error("Not connected to instrument")]
    NotConnected,

    #[error("Link is desynchronized; reset() is required before '{command}'")]
    ResetRequired { command: char },

    #[error("{what} is not supported by {model}")]
    Unsupported { what: &'static str, model: &'static str },

    #[error("{parameter} value {value:#06X} outside [{min:#06X}, {max:#06X}]")]
    ValueOutOfRange {
        parameter: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("Invalid waveform: {0}")]
    InvalidWaveform(String),

    #[error("Timed out on '{command}': got {} of {expected} bytes {}", .received.len(), printable(.received))]
    TimedOut {
        command: char,
        expected: usize,
        received: Vec<u8>,
    },

    #[error("Unexpected echo to '{command}': {}", printable(.received))]
    UnexpectedEcho { command: char, received: Vec<u8> },

    #[error("Echo failure on '{command}': sent {sent}, got {}", printable(.received))]
    EchoFailure {
        command: char,
        sent: String,
        received: Vec<u8>,
    },

    #[error("Reply to '{command}' has length {} (expected {expected}): {}", .received.len(), printable(.received))]
    UnexpectedReplyLength {
        command: char,
        expected: usize,
        received: Vec<u8>,
    },

    #[error("Unexpected reply to '{command}' ({reason}): {}", printable(.received))]
    UnexpectedProtocol {
        command: char,
        reason: String,
        received: Vec<u8>,
    },

    #[error("Burst has {actual} channels, accumulator has {expected}")]
    BurstLengthMismatch { expected: usize, actual: usize },

    #[error("Cycle counter did not reach {target} before the deadline (last {last:?})")]
    PollDeadlineExceeded { target: u32, last: Option<u32> },

    #[error("Cycle count poll cancelled waiting for {target} (last {last:?})")]
    PollCancelled { target: u32, last: Option<u32> },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// True for the errors that mean the byte stream itself can no longer be
    /// trusted, as opposed to input validation failures.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            ProtocolError::TimedOut { .. }
                | ProtocolError::UnexpectedEcho { .. }
                | ProtocolError::EchoFailure { .. }
                | ProtocolError::UnexpectedReplyLength { .. }
                | ProtocolError::UnexpectedProtocol { .. }
                | ProtocolError::IoError(_)
                | ProtocolError::LinkWriteFailure { .. }
        )
    }
}
