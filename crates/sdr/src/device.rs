// Copyright 2025-2026 CEMAXECUTER LLC

//! Device session: the open handle and its lifecycle.

use std::sync::Arc;

use crate::config::DeviceConfig;
use crate::driver::{Device, Library};
use crate::error::{DriverStatus, Error, Result};
use crate::params::{FrequencyParameters, GainSettings};
use crate::stream::{ActiveStream, Shared, StopReason, StreamKind};

/// An open HackRF.
///
/// Owns the driver handle exclusively. Streaming sessions, parameters and
/// the transmit queue all hang off this value; dropping it stops any stream
/// and closes the device.
pub struct HackRf {
    device: Option<Box<dyn Device>>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) active: Option<ActiveStream>,
    pub(crate) config: DeviceConfig,
    pub(crate) sample_count_limit: u64,
    pub(crate) freq: FrequencyParameters,
    pub(crate) gain: GainSettings,
}

impl HackRf {
    /// Serial numbers of attached devices, in index order.
    pub fn enumerate(lib: &dyn Library) -> Result<Vec<String>> {
        let code = lib.init();
        if !DriverStatus::from_code(code).is_success() {
            return Err(Error::driver(code));
        }
        Ok(lib.device_list())
    }

    /// Open the device at `index` with default settings.
    pub fn open(lib: &dyn Library, index: usize) -> Result<Self> {
        Self::open_with_config(lib, index, DeviceConfig::default())
    }

    /// Open the device at `index` and apply `config` to it.
    pub fn open_with_config(lib: &dyn Library, index: usize, config: DeviceConfig) -> Result<Self> {
        let serials = Self::enumerate(lib)?;
        if serials.is_empty() {
            return Err(Error::DeviceUnavailable(
                "No HackRF devices attached to host".to_string(),
            ));
        }
        if index >= serials.len() {
            return Err(Error::DeviceUnavailable(format!(
                "HackRF with index {} not attached to host (found {} HackRF devices)",
                index,
                serials.len()
            )));
        }

        let device = lib.open(index).map_err(Error::driver)?;
        let mut radio = Self {
            device: Some(device),
            shared: Shared::new(),
            active: None,
            config,
            sample_count_limit: 0,
            freq: FrequencyParameters::default(),
            gain: GainSettings::default(),
        };
        radio.apply_config()?;

        log::info!(
            "HackRF opened (index={}, serial={}, {} MHz, {} MS/s)",
            index,
            serials[index],
            radio.center_freq() / 1_000_000,
            radio.sample_rate() / 1e6
        );
        Ok(radio)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Stop any stream and release the handle. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.device.is_none() {
            return;
        }
        self.shared.lock().finish(StopReason::Requested);
        self.release();
        log::info!("HackRF closed");
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.device.is_some() {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    pub(crate) fn device_mut(&mut self) -> Result<&mut (dyn Device + 'static)> {
        self.device.as_deref_mut().ok_or(Error::Closed)
    }

    /// Turn a driver status into a `Result`. Anything but a success code
    /// shuts the session down: mode off, bias tee off, device closed.
    pub(crate) fn check(&mut self, code: i32) -> Result<()> {
        let status = DriverStatus::from_code(code);
        if status.is_success() {
            return Ok(());
        }

        log::error!("HackRF driver error {} ({}), closing device", code, status);
        self.shared.lock().finish(StopReason::DriverError);
        self.release();
        Err(Error::driver(code))
    }

    /// Stop a registered stream, close the handle, then drop the callback
    /// registration the driver was pointing at.
    fn release(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        let active = self.active.take();
        if let Some(stream) = &active {
            let code = match stream.kind {
                StreamKind::Tx => device.stop_tx(),
                StreamKind::Rx | StreamKind::Sweep => device.stop_rx(),
            };
            if !DriverStatus::from_code(code).is_success() {
                log::warn!("HackRF stop before close failed: {}", DriverStatus::from_code(code));
            }
        }
        let code = device.close();
        if !DriverStatus::from_code(code).is_success() {
            log::warn!("HackRF close failed: {}", DriverStatus::from_code(code));
        }
        drop(device);
        drop(active);
    }
}

impl Drop for HackRf {
    fn drop(&mut self) {
        self.close();
    }
}
