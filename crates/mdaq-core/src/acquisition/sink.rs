//! Burst sinks

use std::error::Error;
use uuid::Uuid;

use super::TimedBurst;
use crate::spectrum::AccumulatedTotal;

/// Receives each burst of an acquisition run as soon as it completes.
///
/// Saving, plotting or printing bursts is the caller's business; an error
/// returned here ends the run.
pub trait BurstSink {
    /// Take one burst. `total` already includes it.
    fn accept(
        &mut self,
        run: &Uuid,
        burst: &TimedBurst,
        total: &AccumulatedTotal,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

impl BurstSink for Vec<TimedBurst> {
    fn accept(
        &mut self,
        _run: &Uuid,
        burst: &TimedBurst,
        _total: &AccumulatedTotal,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.push(burst.clone());
        Ok(())
    }
}
