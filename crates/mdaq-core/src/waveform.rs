//! Reference waveforms
//!
//! The instrument's waveform memory holds one 16-bit sample per channel. On
//! the wire it travels as a flat string of 4 hex digits per sample, with no
//! separators and no terminator on upload.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::hex::parse_fixed_width;
use crate::protocol::{HardwareCapabilities, ProtocolError};

/// Hex digits per waveform sample
pub const HEX_DIGITS_PER_SAMPLE: usize = 4;

/// A complete waveform in its wire representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Waveform {
    hex: String,
}

impl Waveform {
    /// Validate a hex string: whole samples of 4 hex digits, nothing else.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self, ProtocolError> {
        let hex = hex.into();
        if hex.is_empty() || hex.len() % HEX_DIGITS_PER_SAMPLE != 0 {
            return Err(ProtocolError::InvalidWaveform(format!(
                "{} hex characters is not a whole number of samples",
                hex.len()
            )));
        }
        if let Some(pos) = hex.bytes().position(|b| !b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidWaveform(format!(
                "non-hex character at offset {}",
                pos
            )));
        }
        Ok(Self { hex })
    }

    /// Encode samples as uppercase hex
    pub fn from_samples(samples: &[u16]) -> Self {
        let hex = samples.iter().map(|s| format!("{:04X}", s)).collect();
        Self { hex }
    }

    /// Check that the waveform fills exactly the model's waveform memory
    pub fn check_length(&self, caps: &HardwareCapabilities) -> Result<(), ProtocolError> {
        let expected = caps.waveform_hex_len();
        if self.hex.len() != expected {
            return Err(ProtocolError::InvalidWaveform(format!(
                "{} needs {} hex characters, got {}",
                caps.identification,
                expected,
                self.hex.len()
            )));
        }
        Ok(())
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.hex.len() / HEX_DIGITS_PER_SAMPLE
    }

    /// Check whether the waveform has no samples
    pub fn is_empty(&self) -> bool {
        self.hex.is_empty()
    }

    /// Wire representation
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Decode the samples
    pub fn samples(&self) -> Vec<u16> {
        // validated on construction, every 4-digit chunk fits a u16
        parse_fixed_width(&self.hex, HEX_DIGITS_PER_SAMPLE)
            .map(|v| v.into_iter().map(|s| s as u16).collect())
            .unwrap_or_default()
    }
}

impl TryFrom<String> for Waveform {
    type Error = ProtocolError;

    fn try_from(hex: String) -> Result<Self, Self::Error> {
        Waveform::from_hex(hex)
    }
}

impl From<Waveform> for String {
    fn from(w: Waveform) -> Self {
        w.hex
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Model;

    #[test]
    fn test_from_samples() {
        let w = Waveform::from_samples(&[0, 1, 2, 0x3FF]);
        assert_eq!(w.as_hex(), "00000001000203FF");
        assert_eq!(w.len(), 4);
        assert_eq!(w.samples(), vec![0, 1, 2, 0x3FF]);
    }

    #[test]
    fn test_from_hex_validation() {
        assert!(Waveform::from_hex("0000000").is_err());
        assert!(Waveform::from_hex("").is_err());
        assert!(Waveform::from_hex("00G0").is_err());
        assert!(Waveform::from_hex("00ff").is_ok());
    }

    #[test]
    fn test_length_against_model() {
        let caps = Model::Mdaq107.capabilities();
        let full = Waveform::from_samples(&vec![0x800; caps.channel_count]);
        assert!(full.check_length(caps).is_ok());
        assert!(full.check_length(Model::Mdaq209.capabilities()).is_err());

        let short = Waveform::from_samples(&[0; 16]);
        assert!(matches!(
            short.check_length(caps),
            Err(ProtocolError::InvalidWaveform(_))
        ));
    }

    #[test]
    fn test_serde_validates() {
        let w: Waveform = serde_json::from_str("\"00010002\"").unwrap();
        assert_eq!(w.samples(), vec![1, 2]);
        assert!(serde_json::from_str::<Waveform>("\"xyz\"").is_err());
    }
}
