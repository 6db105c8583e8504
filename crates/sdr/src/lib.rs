// Copyright 2025-2026 CEMAXECUTER LLC

//! HackRF streaming control.
//!
//! [`HackRf`] owns one open device and runs receive, transmit and sweep
//! sessions on top of the driver's asynchronous transfer callbacks. The
//! hardware is reached through the [`driver::Library`] / [`driver::Device`]
//! traits: `ffi::LibHackrf` binds the system libhackrf (cargo feature
//! `hackrf`), [`sim::SimLibrary`] runs without hardware.
//!
//! ```no_run
//! use hrf_sdr::{sim::SimLibrary, HackRf};
//!
//! # fn main() -> hrf_sdr::Result<()> {
//! let lib = SimLibrary::new();
//! let mut radio = HackRf::open(&lib, 0)?;
//! radio.set_center_freq(2_440_000_000)?;
//! let samples = radio.read_samples(1 << 16)?;
//! # let _ = samples;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod driver;
pub mod error;
#[cfg(feature = "hackrf")]
pub mod ffi;
pub mod params;
pub mod sim;
pub mod stream;
pub mod sweep;
pub mod tx;

mod device;

pub use config::DeviceConfig;
pub use device::HackRf;
pub use error::{DriverStatus, Error, Result};
pub use num_complex::Complex64;
pub use params::{FrequencyParameters, GainSettings};
pub use stream::{RxSink, StopReason, TransceiverMode};
pub use sweep::{SweepBand, SweepFrame, SweepPlan, SweepSink};
