//! Burst controller

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{BurstSink, TimedBurst};
use crate::config::AcquisitionSettings;
use crate::protocol::{ClearScope, ProtocolError, Session};
use crate::spectrum::{AccumulatedTotal, SpectrumBurst, SpectrumFormat};

/// Errors ending an acquisition run
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Burst sink failed: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Outcome of [`AcquisitionController::run`]
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Run id, also passed to the sink
    pub id: Uuid,
    /// Wall-clock start of the run
    pub started: DateTime<Utc>,
    /// Bursts completed and handed to the sink
    pub bursts: usize,
    /// Sum of every completed burst
    pub total: AccumulatedTotal,
    /// The run stopped because the cancellation token fired
    pub cancelled: bool,
}

/// Runs bursts on a borrowed session
pub struct AcquisitionController<'s> {
    session: &'s mut Session,
    settings: AcquisitionSettings,
    epoch: Instant,
}

impl<'s> AcquisitionController<'s> {
    /// Borrow a session for the duration of an acquisition
    pub fn new(session: &'s mut Session, settings: AcquisitionSettings) -> Self {
        Self {
            session,
            settings,
            epoch: Instant::now(),
        }
    }

    /// The borrowed session
    pub fn session(&mut self) -> &mut Session {
        self.session
    }

    /// Acquisition settings in use
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Acquire one burst of `cycles` cycles.
    ///
    /// Counters are cleared, the cycle number armed and counting started.
    /// The cycle counter is then polled every `poll_interval` until it reads
    /// exactly `cycles`; only then is the spectrum fetched. Polling gives up at
    /// `deadline` or when `cancel` fires, and the instrument is left counting
    /// in both cases.
    pub fn run_burst(
        &mut self,
        cycles: u32,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<TimedBurst, ProtocolError> {
        self.session.clear(false)?;
        self.session.set_cycle_number(cycles)?;
        let started = self.epoch.elapsed();
        self.session.start()?;

        self.wait_for_cycles(cycles, deadline, cancel)?;
        let elapsed = self.epoch.elapsed();
        self.session.mark_cycles_complete();

        let burst = self.fetch()?;
        tracing::debug!(cycles, counts = burst.total(), "burst complete");
        Ok(TimedBurst {
            timestamp: Utc::now(),
            started,
            elapsed,
            cycles,
            burst,
        })
    }

    fn wait_for_cycles(
        &mut self,
        target: u32,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), ProtocolError> {
        let interval = self.settings.poll_interval();
        loop {
            let count = self.session.get_cycle_number()?;
            let last = Some(count);
            if count == target {
                return Ok(());
            }
            tracing::trace!(count, target, "counting");

            let now = Instant::now();
            if cancel.is_cancelled() {
                return Err(ProtocolError::PollCancelled { target, last });
            }
            if now >= deadline {
                return Err(ProtocolError::PollDeadlineExceeded { target, last });
            }
            std::thread::sleep(interval.min(deadline - now));
        }
    }

    fn fetch(&mut self) -> Result<SpectrumBurst, ProtocolError> {
        match self.settings.format {
            SpectrumFormat::Ascii => self.session.get_counters(),
            SpectrumFormat::Binary(width) => self.session.get_bin_counters(width),
        }
    }

    /// Add a burst into a total, channel by channel
    pub fn accumulate(
        total: &mut AccumulatedTotal,
        burst: &SpectrumBurst,
    ) -> Result<(), ProtocolError> {
        total.add(burst)
    }

    /// Clear the hardware counters, and on a soft clear the caller's total too
    pub fn clear(
        &mut self,
        soft: bool,
        total: &mut AccumulatedTotal,
    ) -> Result<ClearScope, ProtocolError> {
        let scope = self.session.clear(soft)?;
        if scope.zero_totals() {
            total.zero();
        }
        Ok(scope)
    }

    /// Acquire `bursts` bursts of the configured cycle count.
    ///
    /// Each burst is summed into the run total and handed to `sink`. The run
    /// ends early, without error, when `cancel` fires. Each burst must finish
    /// within `burst_timeout`. Counting is never stopped on the way out.
    pub fn run(
        &mut self,
        bursts: usize,
        burst_timeout: Duration,
        sink: &mut dyn BurstSink,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, AcquisitionError> {
        let mut summary = RunSummary {
            id: Uuid::new_v4(),
            started: Utc::now(),
            bursts: 0,
            total: AccumulatedTotal::default(),
            cancelled: false,
        };
        let cycles = self.settings.cycles_per_burst;
        self.session.reset_running_total();
        tracing::info!(run = %summary.id, bursts, cycles, format = ?self.settings.format, "acquisition run started");

        while summary.bursts < bursts {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let deadline = Instant::now() + burst_timeout;
            let burst = match self.run_burst(cycles, deadline, cancel) {
                Ok(burst) => burst,
                Err(ProtocolError::PollCancelled { .. }) => {
                    summary.cancelled = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            summary.total.add(&burst.burst)?;
            summary.bursts += 1;
            sink.accept(&summary.id, &burst, &summary.total)
                .map_err(AcquisitionError::Sink)?;
        }

        tracing::info!(
            run = %summary.id,
            bursts = summary.bursts,
            cancelled = summary.cancelled,
            "acquisition run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Model, SimulatedMdaq};

    fn session(model: Model) -> (Session, crate::protocol::SimulatorHandle) {
        let sim = SimulatedMdaq::new(model, 11);
        let handle = sim.handle();
        let mut session = Session::with_link(Box::new(sim), model);
        session.reset().unwrap();
        (session, handle)
    }

    fn settings() -> AcquisitionSettings {
        AcquisitionSettings {
            poll_interval_ms: 1,
            ..AcquisitionSettings::default()
        }
    }

    #[test]
    fn test_run_burst_reaches_target() {
        let (mut session, handle) = session(Model::Mdaq209);
        handle.set_cycles_per_query(3);
        let mut controller = AcquisitionController::new(&mut session, settings());

        let burst = controller
            .run_burst(8, Instant::now() + Duration::from_secs(5), &CancellationToken::new())
            .unwrap();
        assert_eq!(burst.cycles, 8);
        assert_eq!(burst.burst.len(), 2048);
        assert_eq!(burst.burst.total(), handle.counts().iter().map(|&c| c as u64).sum::<u64>());
        assert!(burst.elapsed >= burst.started);
    }

    #[test]
    fn test_soft_clear_zeroes_total() {
        let (mut session, _handle) = session(Model::Mdaq107);
        let mut controller = AcquisitionController::new(&mut session, settings());
        let mut total = AccumulatedTotal::new(2);
        AcquisitionController::accumulate(
            &mut total,
            &SpectrumBurst::new(vec![3, 4], SpectrumFormat::Ascii),
        )
        .unwrap();

        assert_eq!(controller.clear(false, &mut total).unwrap(), ClearScope::Hardware);
        assert_eq!(total.counts(), &[3, 4]);
        assert_eq!(
            controller.clear(true, &mut total).unwrap(),
            ClearScope::HardwareAndTotals
        );
        assert_eq!(total.counts(), &[0, 0]);
    }

    #[test]
    fn test_run_collects_bursts() {
        let (mut session, handle) = session(Model::Mdaq107);
        handle.set_cycles_per_query(16);
        let mut controller = AcquisitionController::new(&mut session, settings());
        let mut collected: Vec<TimedBurst> = Vec::new();

        let summary = controller
            .run(3, Duration::from_secs(5), &mut collected, &CancellationToken::new())
            .unwrap();
        assert_eq!(summary.bursts, 3);
        assert!(!summary.cancelled);
        assert_eq!(collected.len(), 3);

        let expected: Vec<u64> = (0..1024)
            .map(|i| collected.iter().map(|b| b.burst.counts()[i] as u64).sum())
            .collect();
        assert_eq!(summary.total.counts(), expected.as_slice());
    }

    #[test]
    fn test_run_stops_when_cancelled() {
        let (mut session, _handle) = session(Model::Mdaq107);
        let mut controller = AcquisitionController::new(&mut session, settings());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut collected: Vec<TimedBurst> = Vec::new();

        let summary = controller
            .run(3, Duration::from_secs(5), &mut collected, &cancel)
            .unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.bursts, 0);
        assert!(collected.is_empty());
    }
}
