use mdaq_core::acquisition::{AcquisitionController, AcquisitionError, BurstSink, TimedBurst};
use mdaq_core::config::AcquisitionSettings;
use mdaq_core::protocol::{
    InstrumentLink, ItemWidth, Model, ProtocolError, Session, SessionState, SimulatedMdaq,
    SimulatorHandle,
};
use mdaq_core::spectrum::{AccumulatedTotal, SpectrumFormat};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::error::Error;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn reset_session(model: Model) -> (Session, SimulatorHandle) {
    let sim = SimulatedMdaq::new(model, 42);
    let handle = sim.handle();
    let mut session = Session::with_link(Box::new(sim), model);
    session.reset().unwrap();
    handle.clear_written();
    (session, handle)
}

/// Answers clear, arm and start like the instrument, and plays back a fixed
/// sequence of cycle counter readings, repeating the last one.
#[derive(Clone)]
struct CounterScript {
    counts: Arc<Mutex<VecDeque<u32>>>,
    rx: Arc<Mutex<VecDeque<u8>>>,
    writes: Arc<Mutex<Vec<String>>>,
}

impl CounterScript {
    fn new(counts: &[u32]) -> Self {
        Self {
            counts: Arc::new(Mutex::new(counts.iter().copied().collect())),
            rx: Arc::default(),
            writes: Arc::default(),
        }
    }

    fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

impl Read for CounterScript {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock().unwrap();
        let n = buf.len().min(rx.len());
        for (slot, b) in buf.iter_mut().zip(rx.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }
}

impl Write for CounterScript {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let sent = String::from_utf8_lossy(buf).into_owned();
        let reply = match sent.as_str() {
            "Z" | "S" => "OK\r\n".to_string(),
            "N" => "N:0000?".to_string(),
            "M" => {
                let mut counts = self.counts.lock().unwrap();
                let count = if counts.len() > 1 {
                    counts.pop_front().unwrap()
                } else {
                    counts[0]
                };
                format!("{:08X}\r\n", count)
            }
            value if value.len() == 4 => format!("{}\r\n", value),
            _ => String::new(),
        };
        self.writes.lock().unwrap().push(sent);
        self.rx.lock().unwrap().extend(reply.bytes());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl InstrumentLink for CounterScript {
    fn waiting(&mut self) -> io::Result<usize> {
        Ok(self.rx.lock().unwrap().len())
    }
}

fn fast(format: SpectrumFormat) -> AcquisitionSettings {
    AcquisitionSettings {
        format,
        cycles_per_burst: 10,
        poll_interval_ms: 1,
    }
}

fn soon() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

#[test]
fn test_counters_fetched_only_after_target() {
    let (mut session, handle) = reset_session(Model::Mdaq209);
    handle.set_cycles_per_query(2);
    let mut controller = AcquisitionController::new(&mut session, fast(SpectrumFormat::Ascii));

    let burst = controller
        .run_burst(10, soon(), &CancellationToken::new())
        .unwrap();
    assert_eq!(burst.cycles, 10);

    // Z, N with its value, S, then five polls (2, 4, 6, 8, 10), one status
    // read for the unknown step, and only then the dump
    let written = handle.written();
    assert_eq!(String::from_utf8_lossy(&written), "ZN000ASMMMMMhY");
}

#[test]
fn test_counter_past_target_is_not_completion() {
    let script = CounterScript::new(&[5, 12]);
    let mut session = Session::with_link(Box::new(script.clone()), Model::Mdaq107);
    let mut controller = AcquisitionController::new(&mut session, fast(SpectrumFormat::Ascii));

    let err = controller
        .run_burst(
            10,
            Instant::now() + Duration::from_millis(30),
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::PollDeadlineExceeded {
            target: 10,
            last: Some(12)
        }
    ));

    let writes = script.writes();
    assert_eq!(&writes[..5], &["Z", "N", "000A", "S", "M"]);
    assert!(writes[4..].iter().all(|w| w == "M"));
}

#[test]
fn test_poll_deadline() {
    let (mut session, handle) = reset_session(Model::Mdaq107);
    handle.set_cycles_per_query(0);
    let mut controller = AcquisitionController::new(&mut session, fast(SpectrumFormat::Ascii));

    let started = Instant::now();
    let err = controller
        .run_burst(10, started + Duration::from_millis(30), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::PollDeadlineExceeded {
            target: 10,
            last: Some(0)
        }
    ));
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(!handle.written().contains(&b'Y'));

    // the instrument was left counting and the link is still usable
    assert_eq!(session.state(), SessionState::Acquiring);
    assert!(handle.is_running());
    session.stop().unwrap();
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_poll_cancellation() {
    let (mut session, handle) = reset_session(Model::Mdaq209);
    handle.set_cycles_per_query(0);
    let mut controller = AcquisitionController::new(&mut session, fast(SpectrumFormat::Ascii));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        trigger.cancel();
    });

    let err = controller.run_burst(10, soon(), &cancel).unwrap_err();
    canceller.join().unwrap();
    assert!(matches!(
        err,
        ProtocolError::PollCancelled {
            target: 10,
            last: Some(0)
        }
    ));
}

#[test]
fn test_binary_run_matches_running_total() {
    let (mut session, handle) = reset_session(Model::Mdaq209);
    handle.set_cycles_per_query(5);
    let mut controller = AcquisitionController::new(
        &mut session,
        fast(SpectrumFormat::Binary(ItemWidth::Four)),
    );
    let mut collected: Vec<TimedBurst> = Vec::new();

    let summary = controller
        .run(4, Duration::from_secs(5), &mut collected, &CancellationToken::new())
        .unwrap();
    assert_eq!(summary.bursts, 4);
    assert!(collected
        .iter()
        .all(|b| b.burst.format() == SpectrumFormat::Binary(ItemWidth::Four)));
    assert_eq!(controller.session().running_total(), summary.total.counts());
}

struct FailingSink {
    seen: Vec<(Uuid, u64)>,
    fail_after: usize,
}

impl BurstSink for FailingSink {
    fn accept(
        &mut self,
        run: &Uuid,
        _burst: &TimedBurst,
        total: &AccumulatedTotal,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.seen.len() == self.fail_after {
            return Err("disk full".into());
        }
        self.seen.push((*run, total.counts().iter().sum()));
        Ok(())
    }
}

#[test]
fn test_sink_error_ends_run() {
    let (mut session, handle) = reset_session(Model::Mdaq107);
    handle.set_cycles_per_query(10);
    let mut controller = AcquisitionController::new(&mut session, fast(SpectrumFormat::Ascii));
    let mut sink = FailingSink {
        seen: Vec::new(),
        fail_after: 2,
    };

    let err = controller
        .run(5, Duration::from_secs(5), &mut sink, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, AcquisitionError::Sink(_)));

    // one run id, and the total handed over grows burst by burst
    assert_eq!(sink.seen.len(), 2);
    assert_eq!(sink.seen[0].0, sink.seen[1].0);
    assert!(sink.seen[1].1 > sink.seen[0].1);
}
