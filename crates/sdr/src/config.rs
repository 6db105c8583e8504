// Copyright 2025-2026 CEMAXECUTER LLC

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Settings applied to the hardware when a device is opened.
///
/// Every `HackRf` gets its own copy; nothing is shared between sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Center frequency in Hz
    pub center_freq: u64,
    /// Sample rate in Hz
    pub sample_rate: f64,
    pub lna_gain: u32,
    pub vga_gain: u32,
    pub txvga_gain: u32,
    /// 14 dB front-end amplifier
    pub amplifier_on: bool,
    /// Upper bound for `read_samples` and other blocking waits
    pub read_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            center_freq: 433_200_000,
            sample_rate: 20_000_000.0,
            lna_gain: 16,
            vga_gain: 16,
            txvga_gain: 10,
            amplifier_on: false,
            read_timeout_ms: 10_000,
        }
    }
}

impl DeviceConfig {
    /// Parse a JSON document. Missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = DeviceConfig::from_json(r#"{ "center_freq": 88500000, "lna_gain": 32 }"#).unwrap();
        assert_eq!(cfg.center_freq, 88_500_000);
        assert_eq!(cfg.lna_gain, 32);
        assert_eq!(cfg.vga_gain, 16);
        assert_eq!(cfg.sample_rate, 20e6);
        assert_eq!(cfg.read_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_bad_json() {
        let err = DeviceConfig::from_json("{ center_freq: ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
