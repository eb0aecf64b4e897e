//! Simulated MDAQ instrument
//!
//! An in-process stand-in for the firmware, used for demo mode and as a test
//! double. It answers every command of the selected generation byte for byte:
//! echo-verified sets, status lines, spectrum dumps in all encodings, the cycle
//! counter, waveform transfers and the reset handshake.
//!
//! Counting is driven by the host: every `M` query while running advances the
//! cycle counter by a fixed number of cycles and adds seeded random counts
//! shaped like a single absorption line. The counter stops by itself at `N`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use super::capabilities::{HardwareCapabilities, Model, TERMINATOR};
use super::commands::{Command, ItemWidth, StoredWave};
use super::link::InstrumentLink;
use super::parameters::Parameter;

/// Baseline counts per channel and cycle
const BASELINE: u32 = 40;
/// Relative depth of the simulated absorption line
const LINE_DEPTH: f64 = 0.3;
/// Half width of the line, in channels
const LINE_HALF_WIDTH: f64 = 12.0;

/// What the firmware is waiting for after a command byte
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Command,
    Value { parameter: Parameter, digits: Vec<u8> },
    Wave { digits: Vec<u8> },
    Selector,
}

/// Simulated firmware state
struct Instrument {
    caps: &'static HardwareCapabilities,
    registers: BTreeMap<Parameter, u32>,
    running: bool,
    cycles: u32,
    counts: Vec<u32>,
    wave: Vec<u16>,
    selected: StoredWave,
    input: Input,
    outbox: VecDeque<u8>,
    written: Vec<u8>,
    rng: StdRng,
    cycles_per_query: u32,
    corrupt_header: bool,
    corrupt_value: bool,
    mute: bool,
    after_reset: Vec<u8>,
}

impl Instrument {
    fn new(model: Model, seed: u64) -> Self {
        let caps = model.capabilities();
        let mut instrument = Self {
            caps,
            registers: BTreeMap::new(),
            running: false,
            cycles: 0,
            counts: vec![0; caps.channel_count],
            wave: triangle(caps.channel_count),
            selected: StoredWave::ConstantAcceleration,
            input: Input::Command,
            outbox: VecDeque::new(),
            written: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            cycles_per_query: 1,
            corrupt_header: false,
            corrupt_value: false,
            mute: false,
            after_reset: Vec::new(),
        };
        instrument.power_on();
        instrument
    }

    fn power_on(&mut self) {
        let last_channel = self.caps.channel_count as u32 - 1;
        let time_base = match self.caps.model {
            Model::Mdaq107 => 0x1000,
            Model::Mdaq209 => 0x16E3,
        };
        self.registers = [
            (Parameter::Amplitude, 0x100),
            (Parameter::CentralChannel, 0x200),
            (Parameter::CycleNumber, 0x10),
            (Parameter::Offset, 0x800),
            (Parameter::TimeBase, time_base),
            (Parameter::Step, 1),
            (Parameter::GateStart, 0),
            (Parameter::GateEnd, last_channel),
        ]
        .into_iter()
        .collect();
        self.running = false;
        self.cycles = 0;
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.input = Input::Command;
    }

    fn register(&self, parameter: Parameter) -> u32 {
        match parameter {
            Parameter::CycleCounter => self.cycles,
            Parameter::ChannelCount => self.caps.channel_count as u32,
            p => self.registers.get(&p).copied().unwrap_or(0),
        }
    }

    fn reply(&mut self, bytes: &[u8]) {
        if !self.mute {
            self.outbox.extend(bytes);
        }
    }

    fn reply_line(&mut self, body: &str) {
        let line = [body.as_bytes(), TERMINATOR].concat();
        self.reply(&line);
    }

    fn receive(&mut self, byte: u8) {
        self.written.push(byte);
        match std::mem::replace(&mut self.input, Input::Command) {
            Input::Command => self.dispatch(byte),
            Input::Value { parameter, mut digits } => {
                digits.push(byte);
                if digits.len() < 4 {
                    self.input = Input::Value { parameter, digits };
                } else {
                    self.latch(parameter, &digits);
                }
            }
            Input::Wave { mut digits } => {
                digits.push(byte);
                if digits.len() < self.caps.waveform_hex_len() {
                    self.input = Input::Wave { digits };
                } else {
                    self.store_wave(&digits);
                }
            }
            Input::Selector => {
                self.selected = match byte {
                    b'V' => StoredWave::ConstantVelocity,
                    b'P' => StoredWave::Programmed,
                    _ => StoredWave::ConstantAcceleration,
                };
            }
        }
    }

    fn command_for(&self, byte: u8) -> Option<Command> {
        let model = self.caps.model;
        // status first: 'P' is the legacy status byte and the newer step register
        if byte == Command::Status.byte(model) {
            return Some(Command::Status);
        }
        if let Some((parameter, _)) = self
            .caps
            .settable
            .iter()
            .find(|(p, _)| p.code() as u8 == byte)
        {
            return Some(Command::Set(*parameter));
        }
        [
            Command::AsciiDump,
            Command::BinaryDump(ItemWidth::One),
            Command::BinaryDump(ItemWidth::Two),
            Command::BinaryDump(ItemWidth::Four),
            Command::CycleCounter,
            Command::SumInGate,
            Command::Clear,
            Command::DownloadWave,
            Command::UploadWave,
            Command::SelectWave,
            Command::Start,
            Command::Stop,
            Command::Prime,
            Command::Reset,
        ]
        .into_iter()
        .find(|c| c.byte(model) == byte)
    }

    fn dispatch(&mut self, byte: u8) {
        let Some(command) = self.command_for(byte) else {
            return;
        };
        match command {
            Command::Set(parameter) => {
                let previous = self.register(parameter) as u16;
                let header = if std::mem::take(&mut self.corrupt_header) {
                    format!("{}:{:04x}!", byte as char, previous)
                } else {
                    format!("{}:{:04X}?", byte as char, previous)
                };
                self.reply(header.as_bytes());
                self.input = Input::Value {
                    parameter,
                    digits: Vec::with_capacity(4),
                };
            }
            Command::Status => {
                let line = self
                    .caps
                    .status_fields
                    .iter()
                    .map(|(p, width)| format!("{:0width$X}", self.register(*p), width = *width))
                    .collect::<Vec<_>>()
                    .join(" ");
                self.reply_line(&line);
            }
            Command::AsciiDump => {
                let digits = self.caps.hex_digits_per_item;
                let max = if digits >= 8 {
                    u32::MAX
                } else {
                    (1u32 << (4 * digits)) - 1
                };
                let line: String = self
                    .dump_items()
                    .into_iter()
                    .map(|c| format!("{:0digits$X}", c.min(max), digits = digits))
                    .collect();
                self.reply_line(&line);
            }
            Command::BinaryDump(width) => {
                let mut raw = Vec::new();
                for item in self.dump_items() {
                    match width {
                        ItemWidth::One => raw.push(item as u8),
                        ItemWidth::Two => raw.extend_from_slice(&(item as u16).to_le_bytes()),
                        ItemWidth::Four => raw.extend_from_slice(&item.to_le_bytes()),
                    }
                }
                self.reply(&raw);
            }
            Command::CycleCounter => {
                self.advance();
                let line = format!("{:08X}", self.cycles);
                self.reply_line(&line);
            }
            Command::SumInGate => {
                let start = self.register(Parameter::GateStart) as usize;
                let end = (self.register(Parameter::GateEnd) as usize).min(self.counts.len() - 1);
                let sum: u64 = self
                    .counts
                    .get(start..=end)
                    .map(|gate| gate.iter().map(|&c| c as u64).sum())
                    .unwrap_or(0);
                let line = format!("{:08X}", sum.min(u32::MAX as u64));
                self.reply_line(&line);
            }
            Command::Clear => {
                self.cycles = 0;
                self.counts.iter_mut().for_each(|c| *c = 0);
                self.reply_line("OK");
            }
            Command::DownloadWave => {
                let line: String = self.wave.iter().map(|s| format!("{:04X}", s)).collect();
                self.reply_line(&line);
            }
            Command::UploadWave => {
                self.input = Input::Wave {
                    digits: Vec::with_capacity(self.caps.waveform_hex_len()),
                };
            }
            Command::SelectWave => self.input = Input::Selector,
            Command::Start => {
                self.running = true;
                self.reply_line("OK");
            }
            Command::Stop => {
                self.running = false;
                self.reply_line("OK");
            }
            Command::Prime => {}
            Command::Reset => {
                self.power_on();
                self.reply_line(self.caps.identification);
                let extra = std::mem::take(&mut self.after_reset);
                self.reply(&extra);
            }
        }
    }

    fn latch(&mut self, parameter: Parameter, digits: &[u8]) {
        let text = String::from_utf8_lossy(digits);
        let Ok(value) = u16::from_str_radix(&text, 16) else {
            self.reply_line("????");
            return;
        };
        self.registers.insert(parameter, value as u32);
        let echo = if std::mem::take(&mut self.corrupt_value) {
            format!("{:04X}", value.wrapping_add(1))
        } else {
            format!("{:04X}", value)
        };
        self.reply_line(&echo);
    }

    fn store_wave(&mut self, digits: &[u8]) {
        let text = String::from_utf8_lossy(digits);
        let samples: Option<Vec<u16>> = text
            .as_bytes()
            .chunks(4)
            .map(|c| u16::from_str_radix(std::str::from_utf8(c).ok()?, 16).ok())
            .collect();
        match samples {
            Some(samples) => {
                self.wave = samples;
                self.reply_line("OK");
            }
            None => self.reply_line("ER"),
        }
    }

    fn advance(&mut self) {
        if !self.running {
            return;
        }
        let target = self.register(Parameter::CycleNumber);
        let cycles = self.cycles_per_query.min(target.saturating_sub(self.cycles));
        for _ in 0..cycles {
            self.count_one_cycle();
        }
        self.cycles += cycles;
        if self.cycles >= target {
            self.running = false;
        }
    }

    fn count_one_cycle(&mut self) {
        let centre = self.counts.len() as f64 / 4.0;
        for (channel, count) in self.counts.iter_mut().enumerate() {
            let x = (channel as f64 - centre) / LINE_HALF_WIDTH;
            let rate = BASELINE as f64 * (1.0 - LINE_DEPTH / (1.0 + x * x));
            let hits = self.rng.gen_range(0..=(2.0 * rate) as u32);
            *count = count.saturating_add(hits);
        }
    }

    /// Counts as the firmware dumps them: summed in groups of `step` channels
    fn dump_items(&self) -> Vec<u32> {
        let step = if self.caps.has_step {
            self.register(Parameter::Step).max(1) as usize
        } else {
            1
        };
        self.counts
            .chunks(step)
            .map(|group| group.iter().fold(0u32, |acc, &c| acc.saturating_add(c)))
            .collect()
    }
}

/// Symmetric triangle over the channels, the constant acceleration reference
fn triangle(channels: usize) -> Vec<u16> {
    let half = (channels / 2).max(1);
    (0..channels)
        .map(|i| {
            let rise = if i < half { i } else { channels - 1 - i };
            (rise * 0xFFFF / half).min(0xFFFF) as u16
        })
        .collect()
}

/// The simulated instrument as an [`InstrumentLink`]
pub struct SimulatedMdaq {
    state: Arc<Mutex<Instrument>>,
}

/// Side door into a running simulator, for inspection and fault injection
#[derive(Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<Instrument>>,
}

fn lock(state: &Arc<Mutex<Instrument>>) -> MutexGuard<'_, Instrument> {
    // the firmware state stays consistent byte by byte, a panic elsewhere
    // does not corrupt it
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulatedMdaq {
    /// Power on a simulated instrument of the given generation
    pub fn new(model: Model, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(Instrument::new(model, seed))),
        }
    }

    /// Handle that stays valid after the channel is moved into a session
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl SimulatorHandle {
    /// Every byte the host has written so far
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    /// Forget the write log
    pub fn clear_written(&self) {
        lock(&self.state).written.clear();
    }

    /// Current value of a register
    pub fn register(&self, parameter: Parameter) -> u32 {
        lock(&self.state).register(parameter)
    }

    /// Whether the instrument is counting
    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Raw per-channel counts since the last clear
    pub fn counts(&self) -> Vec<u32> {
        lock(&self.state).counts.clone()
    }

    /// Waveform memory
    pub fn wave(&self) -> Vec<u16> {
        lock(&self.state).wave.clone()
    }

    /// Stored waveform last selected with `L`
    pub fn selected_wave(&self) -> StoredWave {
        lock(&self.state).selected
    }

    /// Cycles added per `M` query while running
    pub fn set_cycles_per_query(&self, cycles: u32) {
        lock(&self.state).cycles_per_query = cycles;
    }

    /// Send a malformed header echo for the next set command
    pub fn corrupt_next_header(&self) {
        lock(&self.state).corrupt_header = true;
    }

    /// Echo a different value for the next set command
    pub fn corrupt_next_value_echo(&self) {
        lock(&self.state).corrupt_value = true;
    }

    /// Append bytes after the next reset identification
    pub fn trail_next_reset(&self, bytes: &[u8]) {
        lock(&self.state).after_reset = bytes.to_vec();
    }

    /// Stop answering (and start again)
    pub fn set_mute(&self, mute: bool) {
        lock(&self.state).mute = mute;
    }

    /// Queue unsolicited bytes, as line noise would
    pub fn inject(&self, bytes: &[u8]) {
        lock(&self.state).outbox.extend(bytes);
    }
}

impl Read for SimulatedMdaq {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        if state.outbox.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedMdaq {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.state);
        for &byte in buf {
            state.receive(byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl InstrumentLink for SimulatedMdaq {
    fn waiting(&mut self) -> io::Result<usize> {
        Ok(lock(&self.state).outbox.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(sim: &mut SimulatedMdaq, bytes: &[u8]) -> Vec<u8> {
        sim.write_all(bytes).unwrap();
        let mut out = vec![0u8; sim.waiting().unwrap()];
        if !out.is_empty() {
            let n = sim.read(&mut out).unwrap();
            out.truncate(n);
        }
        out
    }

    #[test]
    fn test_set_echo() {
        let mut sim = SimulatedMdaq::new(Model::Mdaq107, 1);
        assert_eq!(exchange(&mut sim, b"K"), b"K:0100?");
        assert_eq!(exchange(&mut sim, b"0200"), b"0200\r\n");
        assert_eq!(sim.handle().register(Parameter::Amplitude), 0x200);
    }

    #[test]
    fn test_status_lines() {
        let mut legacy = SimulatedMdaq::new(Model::Mdaq107, 1);
        let line = exchange(&mut legacy, b"P");
        assert_eq!(line, b"0100 0200 0010 0800 1000\r\n");

        let mut newer = SimulatedMdaq::new(Model::Mdaq209, 1);
        let line = exchange(&mut newer, b"h");
        assert_eq!(line.len(), 61);
        assert!(line.starts_with(b"0800 16E3 0001 00000010"));
    }

    #[test]
    fn test_counting_stops_at_cycle_number() {
        let mut sim = SimulatedMdaq::new(Model::Mdaq209, 7);
        let handle = sim.handle();
        handle.set_cycles_per_query(6);
        assert_eq!(exchange(&mut sim, b"S"), b"OK\r\n");
        assert_eq!(exchange(&mut sim, b"M"), b"00000006\r\n");
        assert_eq!(exchange(&mut sim, b"M"), b"0000000C\r\n");
        assert_eq!(exchange(&mut sim, b"M"), b"00000010\r\n");
        assert!(!handle.is_running());
        assert!(handle.counts().iter().any(|&c| c > 0));
    }

    #[test]
    fn test_reset_reply_and_trailing_fault() {
        let mut sim = SimulatedMdaq::new(Model::Mdaq209, 1);
        sim.handle().trail_next_reset(b"x");
        assert_eq!(exchange(&mut sim, b"*R"), b"MDAQ209\r\nx");
        assert_eq!(exchange(&mut sim, b"R"), b"MDAQ209\r\n");
    }

    #[test]
    fn test_select_wave_is_silent() {
        let mut sim = SimulatedMdaq::new(Model::Mdaq209, 1);
        assert!(exchange(&mut sim, b"LV").is_empty());
        assert_eq!(sim.handle().selected_wave(), StoredWave::ConstantVelocity);
    }

    #[test]
    fn test_triangle_shape() {
        let wave = triangle(8);
        assert_eq!(wave[0], 0);
        assert!(wave[3] > wave[2]);
        assert_eq!(wave[4], wave[3]);
        assert_eq!(wave.len(), 8);
    }
}
