//! Byte link
//!
//! The transport only needs to know how many bytes are waiting; reads are
//! sized to that so they never block on a quiet line.

use std::io::{self, Read, Write};

/// A full-duplex byte link to an instrument: the serial port in production,
/// the simulator or a scripted double in tests.
pub trait InstrumentLink: Read + Write + Send {
    /// Bytes that can be read right now without blocking
    fn waiting(&mut self) -> io::Result<usize>;
}
