//! # MDAQ Core Library
//!
//! Host-side protocol engine for the MDAQ waveform generator / multichannel
//! scaler boards used in Mössbauer spectroscopy.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - The serial command/echo protocol of the MDAQ107 and MDAQ209
//! - Spectrum transfers in ASCII hex and little-endian binary form
//! - Waveform upload and download
//! - Burst acquisition with deadline and cancellation
//! - A simulated instrument for demos and tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use mdaq_core::prelude::*;
//!
//! let config = SessionConfig::from_file("mdaq.json")?;
//! let mut session = Session::open(&config)?;
//! session.reset()?;
//! session.set_amplitude(0x1000)?;
//!
//! let mut controller = AcquisitionController::new(&mut session, config.acquisition.clone());
//! let burst = controller.run_burst(64, deadline, &CancellationToken::new())?;
//! println!("counts: {}", burst.burst.total());
//! ```

pub mod acquisition;
pub mod config;
pub mod protocol;
pub mod spectrum;
pub mod waveform;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::acquisition::{AcquisitionController, BurstSink, TimedBurst};
    pub use crate::config::{AcquisitionSettings, SessionConfig};
    pub use crate::protocol::{
        ItemWidth, Model, Parameter, ProtocolError, Session, SessionState, SharedSession,
        SimulatedMdaq, StoredWave,
    };
    pub use crate::spectrum::{AccumulatedTotal, SpectrumBurst, SpectrumFormat};
    pub use crate::waveform::Waveform;
    pub use tokio_util::sync::CancellationToken;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
