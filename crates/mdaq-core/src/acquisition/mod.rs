//! Acquisition
//!
//! Drives the instrument burst by burst: clear, arm the cycle count, start,
//! wait for the count to be reached, fetch the spectrum. Bursts are summed
//! into a caller-owned total and handed to a [`BurstSink`].

mod controller;
mod sink;

pub use controller::{AcquisitionController, AcquisitionError, RunSummary};
pub use sink::BurstSink;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::spectrum::SpectrumBurst;

/// One completed burst
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedBurst {
    /// Wall-clock time the spectrum was fetched
    pub timestamp: DateTime<Utc>,
    /// Time since the controller was created when counting started
    pub started: Duration,
    /// Time since the controller was created when the cycle count was reached
    pub elapsed: Duration,
    /// Cycles acquired in this burst
    pub cycles: u32,
    /// The spectrum
    pub burst: SpectrumBurst,
}

impl TimedBurst {
    /// Counting time of this burst
    pub fn duration(&self) -> Duration {
        self.elapsed.saturating_sub(self.started)
    }
}
