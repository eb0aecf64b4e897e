//! Parameter cache
//!
//! Host-side mirror of the instrument's parameter registers. Entries become
//! known through successful echo-verified sets or status reads, and all of
//! them are forgotten at once when the link desynchronizes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::capabilities::HardwareCapabilities;

/// Instrument parameters, named after their register letters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Parameter {
    /// `K`: waveform amplitude (DAC counts)
    Amplitude,
    /// `Q`: central channel (MDAQ107 only)
    CentralChannel,
    /// `N`: cycles to acquire before the counter stops
    CycleNumber,
    /// `O`: offset (vestigial on both models)
    Offset,
    /// `U`: time base divisor
    TimeBase,
    /// `P`: channels grouped per memory slot (MDAQ209 only)
    Step,
    /// `G`: gate start channel
    GateStart,
    /// `g`: gate end channel
    GateEnd,
    /// `M`: cycles acquired so far (read-only)
    CycleCounter,
    /// `C`: channel count reported by the status line (read-only)
    ChannelCount,
}

impl Parameter {
    /// Register letter, also the command byte for settable parameters
    pub fn code(self) -> char {
        match self {
            Parameter::Amplitude => 'K',
            Parameter::CentralChannel => 'Q',
            Parameter::CycleNumber => 'N',
            Parameter::Offset => 'O',
            Parameter::TimeBase => 'U',
            Parameter::Step => 'P',
            Parameter::GateStart => 'G',
            Parameter::GateEnd => 'g',
            Parameter::CycleCounter => 'M',
            Parameter::ChannelCount => 'C',
        }
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            Parameter::Amplitude => "amplitude",
            Parameter::CentralChannel => "central channel",
            Parameter::CycleNumber => "cycle number",
            Parameter::Offset => "offset",
            Parameter::TimeBase => "time base",
            Parameter::Step => "step",
            Parameter::GateStart => "gate start",
            Parameter::GateEnd => "gate end",
            Parameter::CycleCounter => "cycle counter",
            Parameter::ChannelCount => "channel count",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// A cached register value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cached {
    /// Last value confirmed by the instrument
    Known(u32),
    /// Never read, or forgotten after a desync
    Unknown,
}

impl Cached {
    /// The value, if known
    pub fn value(self) -> Option<u32> {
        match self {
            Cached::Known(v) => Some(v),
            Cached::Unknown => None,
        }
    }

    /// Check whether the value is known
    pub fn is_known(self) -> bool {
        matches!(self, Cached::Known(_))
    }
}

/// Cache of the parameters one hardware generation exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareParameters {
    entries: BTreeMap<Parameter, Cached>,
}

impl HardwareParameters {
    /// Create a cache with every parameter of the model Unknown
    pub fn new(caps: &HardwareCapabilities) -> Self {
        let entries = caps
            .parameters()
            .map(|p| (p, Cached::Unknown))
            .collect();
        Self { entries }
    }

    /// Current cache entry. Parameters the model lacks read as Unknown.
    pub fn get(&self, parameter: Parameter) -> Cached {
        self.entries
            .get(&parameter)
            .copied()
            .unwrap_or(Cached::Unknown)
    }

    /// Record a confirmed value. Parameters the model lacks are ignored.
    pub fn set_known(&mut self, parameter: Parameter, value: u32) {
        if let Some(entry) = self.entries.get_mut(&parameter) {
            *entry = Cached::Known(value);
        }
    }

    /// Forget every entry at once.
    ///
    /// An echo mismatch means the link is out of step, not that one register
    /// is wrong, so no entry may survive it.
    pub fn invalidate_all(&mut self) {
        for entry in self.entries.values_mut() {
            *entry = Cached::Unknown;
        }
    }

    /// Check whether every entry is Unknown
    pub fn all_unknown(&self) -> bool {
        self.entries.values().all(|c| !c.is_known())
    }

    /// Iterate over all entries in register order
    pub fn iter(&self) -> impl Iterator<Item = (Parameter, Cached)> + '_ {
        self.entries.iter().map(|(p, c)| (*p, *c))
    }
}
