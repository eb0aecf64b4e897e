//! Spectrum and waveform transfers
//!
//! Bulk reads size themselves from the capability table and the cached step
//! divisor, so a dump is always read to its exact length and nothing is left
//! on the wire for the next exchange.

use byteorder::{ByteOrder, LittleEndian};

use super::capabilities::{HardwareCapabilities, TERMINATOR};
use super::commands::{Command, ItemWidth};
use super::hex::{parse_fixed_width, HexError};
use super::session::Session;
use super::ProtocolError;
use crate::spectrum::{SpectrumBurst, SpectrumFormat};
use crate::waveform::{Waveform, HEX_DIGITS_PER_SAMPLE};

/// Acknowledge line after a waveform upload
const UPLOAD_ACK_LEN: usize = 4;

/// Decode the body of an ASCII dump (terminator already stripped)
pub fn decode_ascii_dump(caps: &HardwareCapabilities, body: &[u8]) -> Result<Vec<u32>, HexError> {
    parse_fixed_width(body, caps.hex_digits_per_item)
}

/// Decode a binary dump of little-endian items
pub fn decode_binary_dump(width: ItemWidth, bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(width.bytes())
        .map(|chunk| match width {
            ItemWidth::One => chunk[0] as u32,
            ItemWidth::Two => LittleEndian::read_u16(chunk) as u32,
            ItemWidth::Four => LittleEndian::read_u32(chunk),
        })
        .collect()
}

impl Session {
    /// Fetch the spectrum as one ASCII hex line (`Y`)
    pub fn get_counters(&mut self) -> Result<SpectrumBurst, ProtocolError> {
        let step = self.ensure_step_known()?;
        let items = self.caps.item_count(step);
        self.guarded(Command::AsciiDump, |s, code| {
            let expected = s.caps.ascii_dump_len(items);
            let line = s.query_line(Command::AsciiDump, code, expected)?;
            let counts = decode_ascii_dump(s.caps, &line[..expected - TERMINATOR.len()])
                .map_err(|e| ProtocolError::UnexpectedProtocol {
                    command: code,
                    reason: e.to_string(),
                    received: line.clone(),
                })?;
            tracing::debug!(items, total = counts.iter().map(|&c| c as u64).sum::<u64>(), "ascii dump");
            Ok(SpectrumBurst::new(counts, SpectrumFormat::Ascii))
        })
    }

    /// Fetch the spectrum as raw little-endian items (`I`, `J` or `V`).
    ///
    /// The dump is also added into the session's running total.
    pub fn get_bin_counters(&mut self, width: ItemWidth) -> Result<SpectrumBurst, ProtocolError> {
        if !self.caps.binary_widths.contains(&width) {
            return Err(ProtocolError::Unsupported {
                what: "binary dump width",
                model: self.caps.identification,
            });
        }
        let step = self.ensure_step_known()?;
        let items = self.caps.item_count(step);
        let counts = self.guarded(Command::BinaryDump(width), |s, code| {
            s.send_command(code)?;
            let timeout = s.timeout_for(Command::BinaryDump(width));
            let raw = s.transport.read_exact(code, items * width.bytes(), timeout)?;
            Ok(decode_binary_dump(width, &raw))
        })?;

        self.add_to_running_total(&counts);
        tracing::debug!(items, bytes = width.bytes(), "binary dump");
        Ok(SpectrumBurst::new(counts, SpectrumFormat::Binary(width)))
    }

    fn add_to_running_total(&mut self, counts: &[u32]) {
        if self.running_total.len() != counts.len() {
            if !self.running_total.is_empty() {
                tracing::warn!(
                    was = self.running_total.len(),
                    now = counts.len(),
                    "dump length changed, running total restarted"
                );
            }
            self.running_total = vec![0; counts.len()];
        }
        for (total, &count) in self.running_total.iter_mut().zip(counts) {
            *total += count as u64;
        }
    }

    /// Download the waveform memory (`X`)
    pub fn get_wave(&mut self) -> Result<Waveform, ProtocolError> {
        self.guarded(Command::DownloadWave, |s, code| {
            let expected = s.caps.waveform_hex_len() + TERMINATOR.len();
            let line = s.query_line(Command::DownloadWave, code, expected)?;
            let body = String::from_utf8_lossy(&line[..expected - TERMINATOR.len()]).into_owned();
            Waveform::from_hex(body).map_err(|e| ProtocolError::UnexpectedProtocol {
                command: code,
                reason: e.to_string(),
                received: line.clone(),
            })
        })
    }

    /// Upload a waveform (`W`).
    ///
    /// The length is checked against the model before anything is written;
    /// the command byte and the hex payload then go out in one write.
    pub fn set_wave(&mut self, wave: &Waveform) -> Result<(), ProtocolError> {
        wave.check_length(self.caps)?;
        self.guarded(Command::UploadWave, |s, code| {
            let mut payload = Vec::with_capacity(1 + wave.len() * HEX_DIGITS_PER_SAMPLE);
            payload.push(code as u8);
            payload.extend_from_slice(wave.as_hex().as_bytes());
            s.transport.write_exact(code, &payload)?;

            let timeout = s.timeout_for(Command::UploadWave);
            let ack = s.transport.read_line(code, timeout, UPLOAD_ACK_LEN + 1)?;
            if ack.len() != UPLOAD_ACK_LEN {
                return Err(ProtocolError::UnexpectedReplyLength {
                    command: code,
                    expected: UPLOAD_ACK_LEN,
                    received: ack,
                });
            }
            tracing::info!(samples = wave.len(), "waveform uploaded");
            Ok(())
        })
    }
}
