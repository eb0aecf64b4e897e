//! Serial Protocol Communication
//!
//! Implements the MDAQ command/echo protocol spoken by the MDAQ107 and MDAQ209
//! waveform generator / multichannel scaler boards.
//!
//! Every exchange is strictly request/response over one serial link. Parameter
//! sets are echo-verified, spectra come as one ASCII hex line or as raw
//! little-endian items, and a reset handshake verifies the link.

pub mod capabilities;
mod command;
pub mod commands;
mod error;
pub mod hex;
mod link;
pub mod parameters;
mod reset;
pub mod serial;
mod session;
mod shared;
pub mod simulator;
mod transfer;
mod transport;

pub use capabilities::{Bound, ClockModel, HardwareCapabilities, Model, TERMINATOR};
pub use command::{ClearScope, StatusRecord};
pub use commands::{Command, ItemWidth, StoredWave};
pub use error::ProtocolError;
pub use hex::HexError;
pub use parameters::{Cached, HardwareParameters, Parameter};
pub use serial::{available_ports, SerialLink};
pub use link::InstrumentLink;
pub use session::{Session, SessionState, Timeouts};
pub use shared::SharedSession;
pub use simulator::{SimulatedMdaq, SimulatorHandle};
pub use transfer::{decode_ascii_dump, decode_binary_dump};
pub use transport::TransportSession;

/// Default baud rate of the MDAQ serial link
pub const DEFAULT_BAUD_RATE: u32 = 115200;
