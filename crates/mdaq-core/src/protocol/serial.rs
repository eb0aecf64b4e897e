//! Serial port link

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

use super::link::InstrumentLink;
use super::ProtocolError;

/// Timeout of the OS port. Reads are sized to what is waiting, so this only
/// bounds a misbehaving driver.
const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// An open serial port, 8N1 without flow control
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Open and configure `name`, discarding whatever the OS buffered before.
    pub fn open(name: &str, baud_rate: u32) -> Result<Self, ProtocolError> {
        let unavailable = |e: serialport::Error| ProtocolError::PortUnavailable {
            port: name.to_string(),
            reason: e.to_string(),
        };

        let port = serialport::new(name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(unavailable)?;
        port.clear(ClearBuffer::All).map_err(unavailable)?;

        tracing::debug!(port = name, baud_rate, "serial port configured 8N1");
        Ok(Self { port })
    }

    /// Name the OS reports for the port, if any
    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl InstrumentLink for SerialLink {
    fn waiting(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::other)
    }
}

/// Names of the serial ports present on this machine
pub fn available_ports() -> Vec<String> {
    let mut names: Vec<String> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|info| info.port_name)
        .collect();
    names.sort();
    names
}
