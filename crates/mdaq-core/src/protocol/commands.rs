//! Protocol commands
//!
//! Single-byte command vocabulary of the MDAQ firmware. Uppercase letters set or
//! control, lowercase letters are the secondary queries of the newer model.

use serde::{Deserialize, Serialize};

use super::capabilities::Model;
use super::parameters::Parameter;

/// Width of one counter item in a binary spectrum dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemWidth {
    /// `V`: unsigned char per channel
    One,
    /// `J`: little-endian u16 per channel
    Two,
    /// `I`: little-endian u32 per channel
    Four,
}

impl ItemWidth {
    /// Number of bytes per item on the wire
    pub fn bytes(self) -> usize {
        match self {
            ItemWidth::One => 1,
            ItemWidth::Two => 2,
            ItemWidth::Four => 4,
        }
    }

    /// Look up the width for a byte count of 1, 2 or 4
    pub fn from_bytes(n: usize) -> Option<Self> {
        match n {
            1 => Some(ItemWidth::One),
            2 => Some(ItemWidth::Two),
            4 => Some(ItemWidth::Four),
            _ => None,
        }
    }
}

/// Waveforms stored in the newer model's firmware, selected with `L`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredWave {
    /// Constant acceleration (triangular) reference
    ConstantAcceleration,
    /// Constant velocity reference
    ConstantVelocity,
    /// The waveform last uploaded with `W`
    Programmed,
}

impl StoredWave {
    /// Selector byte sent after `L`
    pub fn selector(self) -> u8 {
        match self {
            StoredWave::ConstantAcceleration => b'A',
            StoredWave::ConstantVelocity => b'V',
            StoredWave::Programmed => b'P',
        }
    }
}

/// Commands understood by the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Echo-verified parameter set (`K`, `N`, `U`, `P`, `G`, `g`, `O`, `Q`)
    Set(Parameter),
    /// Status line (`P` on MDAQ107, `h` on MDAQ209)
    Status,
    /// ASCII hex spectrum dump (`Y`)
    AsciiDump,
    /// Binary spectrum dump (`I`, `J`, `V`)
    BinaryDump(ItemWidth),
    /// Cycle counter query (`M`)
    CycleCounter,
    /// Sum of counts inside the gate (`m`)
    SumInGate,
    /// Clear counters and cycle counter (`Z`)
    Clear,
    /// Download the waveform memory (`X`)
    DownloadWave,
    /// Upload the waveform memory (`W`)
    UploadWave,
    /// Select a stored waveform (`L`)
    SelectWave,
    /// Start counting (`S`)
    Start,
    /// Stop counting (`T`)
    Stop,
    /// Priming byte sent before a reset (`*`)
    Prime,
    /// Reset (`R`)
    Reset,
}

impl Command {
    /// Get the command byte for the given hardware generation
    pub fn byte(self, model: Model) -> u8 {
        match self {
            Command::Set(p) => p.code() as u8,
            Command::Status => match model {
                Model::Mdaq107 => b'P',
                Model::Mdaq209 => b'h',
            },
            Command::AsciiDump => b'Y',
            Command::BinaryDump(ItemWidth::Four) => b'I',
            Command::BinaryDump(ItemWidth::Two) => b'J',
            Command::BinaryDump(ItemWidth::One) => b'V',
            Command::CycleCounter => b'M',
            Command::SumInGate => b'm',
            Command::Clear => b'Z',
            Command::DownloadWave => b'X',
            Command::UploadWave => b'W',
            Command::SelectWave => b'L',
            Command::Start => b'S',
            Command::Stop => b'T',
            Command::Prime => b'*',
            Command::Reset => b'R',
        }
    }

    /// Command byte as a char, for error reporting
    pub fn code(self, model: Model) -> char {
        self.byte(model) as char
    }

    /// Bulk transfers get the session's long timeout
    pub fn is_bulk(self) -> bool {
        matches!(
            self,
            Command::AsciiDump
                | Command::BinaryDump(_)
                | Command::DownloadWave
                | Command::UploadWave
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_byte_differs_by_model() {
        assert_eq!(Command::Status.byte(Model::Mdaq107), b'P');
        assert_eq!(Command::Status.byte(Model::Mdaq209), b'h');
        // 'P' on the newer model is the step setter
        assert_eq!(Command::Set(Parameter::Step).byte(Model::Mdaq209), b'P');
    }

    #[test]
    fn test_binary_dump_bytes() {
        assert_eq!(Command::BinaryDump(ItemWidth::Four).byte(Model::Mdaq107), b'I');
        assert_eq!(Command::BinaryDump(ItemWidth::Two).byte(Model::Mdaq107), b'J');
        assert_eq!(Command::BinaryDump(ItemWidth::One).byte(Model::Mdaq107), b'V');
    }

    #[test]
    fn test_item_width_from_bytes() {
        assert_eq!(ItemWidth::from_bytes(2), Some(ItemWidth::Two));
        assert_eq!(ItemWidth::from_bytes(3), None);
        assert_eq!(ItemWidth::Four.bytes(), 4);
    }

    #[test]
    fn test_bulk_commands() {
        assert!(Command::AsciiDump.is_bulk());
        assert!(Command::UploadWave.is_bulk());
        assert!(!Command::CycleCounter.is_bulk());
    }
}
