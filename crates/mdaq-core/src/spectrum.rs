//! Spectrum data
//!
//! Counts fetched from the multichannel scaler, and the caller-owned running
//! total they are summed into over one acquisition run.

use serde::{Deserialize, Serialize};

use crate::protocol::{ItemWidth, ProtocolError};

/// How a spectrum is fetched from the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrumFormat {
    /// `Y`: one ASCII hex line
    #[default]
    Ascii,
    /// `I`/`J`/`V`: raw little-endian items, no terminator
    Binary(ItemWidth),
}

/// Counts of one burst, in ascending channel order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectrumBurst {
    counts: Vec<u32>,
    format: SpectrumFormat,
}

impl SpectrumBurst {
    /// Wrap decoded counts
    pub fn new(counts: Vec<u32>, format: SpectrumFormat) -> Self {
        Self { counts, format }
    }

    /// Per-channel counts
    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Number of channels (memory slots) in the burst
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Check whether the burst is empty
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Encoding the burst was fetched with
    pub fn format(&self) -> SpectrumFormat {
        self.format
    }

    /// Sum of all channels
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }

    /// Take the counts
    pub fn into_counts(self) -> Vec<u32> {
        self.counts
    }
}

/// Running per-channel sum over the bursts of one acquisition run.
///
/// Owned by the caller, zeroed only on request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccumulatedTotal {
    counts: Vec<u64>,
}

impl AccumulatedTotal {
    /// A zeroed total of `len` channels
    pub fn new(len: usize) -> Self {
        Self {
            counts: vec![0; len],
        }
    }

    /// Per-channel totals
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Check whether the total has no channels
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Set every channel back to zero, keeping the length
    pub fn zero(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    /// Add a burst channel by channel.
    ///
    /// An empty total takes the burst's length. A burst of any other length
    /// is rejected and the total is left unchanged.
    pub fn add(&mut self, burst: &SpectrumBurst) -> Result<(), ProtocolError> {
        if self.counts.is_empty() {
            self.counts = vec![0; burst.len()];
        }
        if burst.len() != self.counts.len() {
            return Err(ProtocolError::BurstLengthMismatch {
                expected: self.counts.len(),
                actual: burst.len(),
            });
        }
        for (total, &count) in self.counts.iter_mut().zip(burst.counts()) {
            *total += count as u64;
        }
        Ok(())
    }
}
