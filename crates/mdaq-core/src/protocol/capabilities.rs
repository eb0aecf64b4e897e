//! Hardware capabilities
//!
//! The two MDAQ generations speak the same command/echo protocol but differ in
//! field widths, counts, bounds and a handful of commands. Those differences
//! are captured here as one static table per model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::commands::ItemWidth;
use super::parameters::Parameter;

/// Line terminator used by every ASCII reply
pub const TERMINATOR: &[u8] = b"\r\n";

/// Hardware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// MDAQ107: 12-bit DAC, 1024 channels
    Mdaq107,
    /// MDAQ209: 14-bit DAC, 2048 channels, step divisor
    Mdaq209,
}

impl Model {
    /// Capability table for this generation
    pub fn capabilities(self) -> &'static HardwareCapabilities {
        match self {
            Model::Mdaq107 => &MDAQ107,
            Model::Mdaq209 => &MDAQ209,
        }
    }

    /// Find the model whose reset reply carries this identification string
    pub fn from_identification(id: &str) -> Option<Self> {
        [Model::Mdaq107, Model::Mdaq209]
            .into_iter()
            .find(|m| m.capabilities().identification == id.trim_end())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.capabilities().identification)
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mdaq107" | "107" | "mdaq107-mac" => Ok(Model::Mdaq107),
            "mdaq209" | "209" => Ok(Model::Mdaq209),
            other => Err(format!("unknown MDAQ model '{}'", other)),
        }
    }
}

/// How the motion frequency follows from the time base (and step)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockModel {
    /// `f = clock / channels / U`
    Fixed { clock_hz: f64 },
    /// `f = clock * P / channels / U`
    Stepped { clock_hz: f64 },
}

/// Inclusive bound of a settable parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    /// Lowest accepted value
    pub min: u32,
    /// Highest accepted value
    pub max: u32,
}

impl Bound {
    const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Check whether `value` lies inside the bound
    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Immutable description of one hardware generation
#[derive(Debug)]
pub struct HardwareCapabilities {
    /// Which generation this table describes
    pub model: Model,
    /// String returned by the reset handshake (without terminator)
    pub identification: &'static str,
    /// DAC resolution, bounds the amplitude
    pub dac_bits: u32,
    /// Physical channels of spectrum and waveform memory
    pub channel_count: usize,
    /// Status line fields in wire order, with their hex digit widths
    pub status_fields: &'static [(Parameter, usize)],
    /// Hex digits per channel in the ASCII dump
    pub hex_digits_per_item: usize,
    /// Binary dump widths the firmware implements
    pub binary_widths: &'static [ItemWidth],
    /// Parameters that can be set with an echo-verified exchange, with bounds
    pub settable: &'static [(Parameter, Bound)],
    /// Gate end must not precede gate start
    pub gate_ordered: bool,
    /// Step divisor is present and sizes the spectrum dump
    pub has_step: bool,
    /// `m` (sum in gate) is implemented
    pub has_gate_sum: bool,
    /// `L` (stored waveform select) is implemented
    pub has_wave_select: bool,
    /// Motion frequency model
    pub clock: ClockModel,
    /// Command timeout the vendor driver used for this model
    pub default_timeout_ms: u64,
}

static MDAQ107: HardwareCapabilities = HardwareCapabilities {
    model: Model::Mdaq107,
    identification: "MDAQ107-MAC",
    dac_bits: 12,
    channel_count: 1024,
    status_fields: &[
        (Parameter::Amplitude, 4),
        (Parameter::CentralChannel, 4),
        (Parameter::CycleNumber, 4),
        (Parameter::Offset, 4),
        (Parameter::TimeBase, 4),
    ],
    hex_digits_per_item: 4,
    binary_widths: &[ItemWidth::One, ItemWidth::Two, ItemWidth::Four],
    settable: &[
        (Parameter::Amplitude, Bound::new(0, 0xFFF)),
        (Parameter::CentralChannel, Bound::new(0, 0xFFF)),
        (Parameter::CycleNumber, Bound::new(0, 0xFFFF)),
        (Parameter::Offset, Bound::new(0, 0xFFF)),
        (Parameter::TimeBase, Bound::new(0x500, 0xFFFF)),
        (Parameter::GateStart, Bound::new(0, 0x3FF)),
        (Parameter::GateEnd, Bound::new(0, 0x3FF)),
    ],
    gate_ordered: true,
    has_step: false,
    has_gate_sum: false,
    has_wave_select: false,
    clock: ClockModel::Fixed { clock_hz: 41.78e6 },
    default_timeout_ms: 2000,
};

static MDAQ209: HardwareCapabilities = HardwareCapabilities {
    model: Model::Mdaq209,
    identification: "MDAQ209",
    dac_bits: 14,
    channel_count: 2048,
    status_fields: &[
        (Parameter::ChannelCount, 4),
        (Parameter::TimeBase, 4),
        (Parameter::Step, 4),
        (Parameter::CycleNumber, 8),
        (Parameter::CycleCounter, 8),
        (Parameter::Amplitude, 8),
        (Parameter::GateStart, 8),
        (Parameter::GateEnd, 8),
    ],
    hex_digits_per_item: 8,
    binary_widths: &[ItemWidth::One, ItemWidth::Two, ItemWidth::Four],
    settable: &[
        (Parameter::Amplitude, Bound::new(0, 0x3FFF)),
        (Parameter::CycleNumber, Bound::new(0, 0xFFFF)),
        (Parameter::Offset, Bound::new(0, 0xFFF)),
        (Parameter::TimeBase, Bound::new(0x200, 0xFFFF)),
        (Parameter::Step, Bound::new(1, 0x200)),
        (Parameter::GateStart, Bound::new(0, 0x800)),
        (Parameter::GateEnd, Bound::new(0, 0x800)),
    ],
    gate_ordered: false,
    has_step: true,
    has_gate_sum: true,
    has_wave_select: true,
    clock: ClockModel::Stepped { clock_hz: 120e6 },
    default_timeout_ms: 4000,
};

impl HardwareCapabilities {
    /// Bound for a settable parameter, `None` if the model cannot set it
    pub fn bound(&self, parameter: Parameter) -> Option<Bound> {
        self.settable
            .iter()
            .find(|(p, _)| *p == parameter)
            .map(|(_, b)| *b)
    }

    /// Every parameter the model exposes, settable or read-only
    pub fn parameters(&self) -> impl Iterator<Item = Parameter> + '_ {
        let mut all: Vec<Parameter> = self
            .settable
            .iter()
            .map(|(p, _)| *p)
            .chain(self.status_fields.iter().map(|(p, _)| *p))
            .chain(std::iter::once(Parameter::CycleCounter))
            .collect();
        all.sort();
        all.dedup();
        all.into_iter()
    }

    /// Expected status line length including the terminator
    pub fn status_line_len(&self) -> usize {
        let digits: usize = self.status_fields.iter().map(|(_, w)| w).sum();
        digits + self.status_fields.len() - 1 + TERMINATOR.len()
    }

    /// Largest amplitude the DAC accepts
    pub fn max_amplitude(&self) -> u32 {
        (1 << self.dac_bits) - 1
    }

    /// Items in one spectrum dump for the given step divisor.
    ///
    /// The legacy model always dumps every channel. The newer one dumps
    /// `ceil(channels / step)` slots.
    pub fn item_count(&self, step: u32) -> usize {
        if !self.has_step || step == 0 {
            return self.channel_count;
        }
        let step = step as usize;
        (self.channel_count + step - 1) / step
    }

    /// Length of the ASCII dump line including the terminator
    pub fn ascii_dump_len(&self, items: usize) -> usize {
        items * self.hex_digits_per_item + TERMINATOR.len()
    }

    /// Hex characters in a waveform (4 per channel)
    pub fn waveform_hex_len(&self) -> usize {
        4 * self.channel_count
    }

    /// Reset reply length including the terminator
    pub fn reset_reply_len(&self) -> usize {
        self.identification.len() + TERMINATOR.len()
    }

    /// Motion frequency in Hz for a step and time base.
    ///
    /// The legacy model has no step, its value is ignored.
    pub fn frequency(&self, step: u32, time_base: u32) -> f64 {
        let channels = self.channel_count as f64;
        let u = time_base.max(1) as f64;
        match self.clock {
            ClockModel::Fixed { clock_hz } => clock_hz / channels / u,
            ClockModel::Stepped { clock_hz } => clock_hz * step as f64 / channels / u,
        }
    }

    /// Cycle number whose acquisition time is closest to `seconds`
    pub fn time_to_cycles(&self, seconds: f64, step: u32, time_base: u32) -> u32 {
        (seconds * self.frequency(step, time_base)).round().max(0.0) as u32
    }

    /// Acquisition time in seconds of `cycles` full waveform periods
    pub fn elapsed_time(&self, cycles: u32, step: u32, time_base: u32) -> f64 {
        cycles as f64 / self.frequency(step, time_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_lengths() {
        assert_eq!(Model::Mdaq107.capabilities().status_line_len(), 26);
        assert_eq!(Model::Mdaq209.capabilities().status_line_len(), 61);
    }

    #[test]
    fn test_item_count_rounds_up() {
        let caps = Model::Mdaq209.capabilities();
        assert_eq!(caps.item_count(1), 2048);
        assert_eq!(caps.item_count(2), 1024);
        assert_eq!(caps.item_count(3), 683);
        assert_eq!(caps.item_count(0x200), 4);
        assert_eq!(Model::Mdaq107.capabilities().item_count(7), 1024);
    }

    #[test]
    fn test_dump_lengths() {
        let legacy = Model::Mdaq107.capabilities();
        assert_eq!(legacy.ascii_dump_len(legacy.item_count(1)), 4096 + 2);
        assert_eq!(legacy.waveform_hex_len(), 4096);
        assert_eq!(legacy.reset_reply_len(), 13);

        let newer = Model::Mdaq209.capabilities();
        assert_eq!(newer.ascii_dump_len(newer.item_count(1)), 8 * 2048 + 2);
        assert_eq!(newer.waveform_hex_len(), 8192);
    }

    #[test]
    fn test_bounds() {
        let legacy = Model::Mdaq107.capabilities();
        assert_eq!(legacy.max_amplitude(), 0xFFF);
        assert!(legacy.bound(Parameter::Step).is_none());
        assert!(!legacy.bound(Parameter::TimeBase).unwrap().contains(0x4FF));

        let newer = Model::Mdaq209.capabilities();
        assert_eq!(newer.max_amplitude(), 0x3FFF);
        assert_eq!(newer.bound(Parameter::Amplitude).unwrap().max, 0x3FFF);
        assert!(newer.bound(Parameter::CentralChannel).is_none());
    }

    #[test]
    fn test_frequency_models() {
        let legacy = Model::Mdaq107.capabilities();
        let f = legacy.frequency(1, 0x1000);
        assert!((f - 41.78e6 / 1024.0 / 4096.0).abs() < 1e-9);

        let newer = Model::Mdaq209.capabilities();
        // default time base 0x16E3 gives roughly 10 Hz
        let f = newer.frequency(1, 0x16E3);
        assert!((f - 10.0).abs() < 0.1);
        assert_eq!(newer.time_to_cycles(60.0, 1, 0x16E3), (60.0 * f).round() as u32);
        let t = newer.elapsed_time(100, 1, 0x16E3);
        assert!((t - 100.0 / f).abs() < 1e-9);
    }

    #[test]
    fn test_model_lookup() {
        assert_eq!(Model::from_identification("MDAQ209\r\n"), Some(Model::Mdaq209));
        assert_eq!(Model::from_identification("MDAQ107-MAC"), Some(Model::Mdaq107));
        assert_eq!(Model::from_identification("MDAQ208"), None);
        assert_eq!("209".parse::<Model>(), Ok(Model::Mdaq209));
        assert!("xyz".parse::<Model>().is_err());
    }

    #[test]
    fn test_parameters_include_read_only() {
        let params: Vec<_> = Model::Mdaq209.capabilities().parameters().collect();
        assert!(params.contains(&Parameter::ChannelCount));
        assert!(params.contains(&Parameter::CycleCounter));
        assert!(!params.contains(&Parameter::CentralChannel));
    }
}
