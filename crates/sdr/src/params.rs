// Copyright 2025-2026 CEMAXECUTER LLC

//! Frequency, rate, filter and gain settings.
//!
//! Every setter rounds or clamps first, sends the result to the driver, and
//! stores it only once the driver accepted it, so the getters always report
//! what the hardware was actually told.

use crate::driver::PartIdSerialNo;
use crate::error::{Error, Result};
use crate::HackRf;

/// Baseband filter bandwidths supported by the MAX2837, ascending.
pub const BASEBAND_FILTER_VALID_VALUES: [u32; 16] = [
    1_750_000, 2_500_000, 3_500_000, 5_000_000, 5_500_000, 6_000_000, 7_000_000, 8_000_000,
    9_000_000, 10_000_000, 12_000_000, 14_000_000, 15_000_000, 20_000_000, 24_000_000, 28_000_000,
];

pub const LNA_GAIN_MAX: u32 = 40;
pub const LNA_GAIN_STEP: u32 = 8;
pub const VGA_GAIN_MAX: u32 = 62;
pub const VGA_GAIN_STEP: u32 = 2;
pub const TXVGA_GAIN_MAX: u32 = 47;

/// Filter bandwidth picked for a sample rate: the largest allowed value not
/// above 75% of the rate, or the smallest one for very low rates.
pub fn auto_filter_bandwidth(sample_rate: f64) -> u32 {
    let target = sample_rate * 0.75;
    BASEBAND_FILTER_VALID_VALUES
        .iter()
        .rev()
        .copied()
        .find(|&bw| bw as f64 <= target)
        .unwrap_or(BASEBAND_FILTER_VALID_VALUES[0])
}

/// Closest allowed filter bandwidth in either direction. Ties go down.
pub fn nearest_filter_bandwidth(hz: u32) -> u32 {
    BASEBAND_FILTER_VALID_VALUES
        .iter()
        .copied()
        .min_by_key(|&bw| bw.abs_diff(hz))
        .unwrap_or(BASEBAND_FILTER_VALID_VALUES[0])
}

pub fn round_lna_gain(value: u32) -> u32 {
    let v = value.min(LNA_GAIN_MAX);
    v - v % LNA_GAIN_STEP
}

pub fn round_vga_gain(value: u32) -> u32 {
    let v = value.min(VGA_GAIN_MAX);
    v - v % VGA_GAIN_STEP
}

pub fn clamp_txvga_gain(value: u32) -> u32 {
    value.min(TXVGA_GAIN_MAX)
}

/// 32 lowercase hex digits, each word zero-padded to 8.
pub fn format_serial(words: &[u32; 4]) -> String {
    words.iter().map(|w| format!("{:08x}", w)).collect()
}

/// Snapshot of the gain stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GainSettings {
    pub lna_gain: u32,
    pub vga_gain: u32,
    pub txvga_gain: u32,
    pub amplifier_on: bool,
    pub bias_tee_on: bool,
}

/// Snapshot of the tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrequencyParameters {
    pub center_freq: u64,
    pub sample_rate: f64,
    pub filter_bandwidth: u32,
}

impl HackRf {
    pub fn center_freq(&self) -> u64 {
        self.freq.center_freq
    }

    pub fn set_center_freq(&mut self, hz: u64) -> Result<()> {
        let code = self.device_mut()?.set_freq(hz);
        self.check(code)?;
        self.freq.center_freq = hz;
        log::debug!("HackRF center frequency {} Hz", hz);
        Ok(())
    }

    pub fn sample_rate(&self) -> f64 {
        self.freq.sample_rate
    }

    /// Set the sample rate and retune the baseband filter to match.
    pub fn set_sample_rate(&mut self, hz: f64) -> Result<()> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(Error::parameter(
                "sample_rate",
                format!("must be a positive number of Hz (got {})", hz),
            ));
        }
        let code = self.device_mut()?.set_sample_rate(hz);
        self.check(code)?;
        self.freq.sample_rate = hz;

        let bandwidth = auto_filter_bandwidth(hz);
        self.apply_filter_bandwidth(bandwidth)?;
        log::debug!("HackRF sample rate {} Hz (filter {} Hz)", hz, bandwidth);
        Ok(())
    }

    pub fn filter_bandwidth(&self) -> u32 {
        self.freq.filter_bandwidth
    }

    /// Override the baseband filter with the closest supported bandwidth.
    pub fn set_filter_bandwidth(&mut self, hz: u32) -> Result<()> {
        let bandwidth = nearest_filter_bandwidth(hz);
        self.apply_filter_bandwidth(bandwidth)?;
        log::debug!("HackRF filter bandwidth {} Hz (requested {})", bandwidth, hz);
        Ok(())
    }

    fn apply_filter_bandwidth(&mut self, bandwidth: u32) -> Result<()> {
        let code = self.device_mut()?.set_baseband_filter_bandwidth(bandwidth);
        self.check(code)?;
        self.freq.filter_bandwidth = bandwidth;
        Ok(())
    }

    pub fn lna_gain(&self) -> u32 {
        self.gain.lna_gain
    }

    /// IF gain, 0-40 dB in 8 dB steps. Rounded down.
    pub fn set_lna_gain(&mut self, value: u32) -> Result<()> {
        let v = round_lna_gain(value);
        let code = self.device_mut()?.set_lna_gain(v);
        self.check(code)?;
        self.gain.lna_gain = v;
        log::debug!("HackRF LNA gain {} dB", v);
        Ok(())
    }

    pub fn vga_gain(&self) -> u32 {
        self.gain.vga_gain
    }

    /// Baseband gain, 0-62 dB in 2 dB steps. Rounded down.
    pub fn set_vga_gain(&mut self, value: u32) -> Result<()> {
        let v = round_vga_gain(value);
        let code = self.device_mut()?.set_vga_gain(v);
        self.check(code)?;
        self.gain.vga_gain = v;
        log::debug!("HackRF VGA gain {} dB", v);
        Ok(())
    }

    pub fn txvga_gain(&self) -> u32 {
        self.gain.txvga_gain
    }

    /// Transmit gain, 0-47 dB in 1 dB steps.
    pub fn set_txvga_gain(&mut self, value: u32) -> Result<()> {
        let v = clamp_txvga_gain(value);
        let code = self.device_mut()?.set_txvga_gain(v);
        self.check(code)?;
        self.gain.txvga_gain = v;
        log::debug!("HackRF TXVGA gain {} dB", v);
        Ok(())
    }

    pub fn amplifier_on(&self) -> bool {
        self.gain.amplifier_on
    }

    pub fn set_amplifier_on(&mut self, on: bool) -> Result<()> {
        let code = self.device_mut()?.set_amp_enable(on);
        self.check(code)?;
        self.gain.amplifier_on = on;
        log::debug!("HackRF amplifier {}", if on { "on" } else { "off" });
        Ok(())
    }

    /// Antenna port DC bias. Cleared whenever a session returns to `Off`.
    pub fn bias_tee_on(&self) -> bool {
        self.shared.lock().bias_tee_on
    }

    pub fn set_bias_tee_on(&mut self, on: bool) -> Result<()> {
        let code = self.device_mut()?.set_antenna_enable(on);
        self.check(code)?;
        self.shared.lock().bias_tee_on = on;
        log::debug!("HackRF bias tee {}", if on { "on" } else { "off" });
        Ok(())
    }

    pub fn gain_settings(&self) -> GainSettings {
        GainSettings {
            bias_tee_on: self.bias_tee_on(),
            ..self.gain
        }
    }

    pub fn frequency_parameters(&self) -> FrequencyParameters {
        self.freq
    }

    /// Board serial number as 32 hex digits.
    pub fn get_serial_no(&mut self) -> Result<String> {
        let mut out = PartIdSerialNo::default();
        let code = self.device_mut()?.board_partid_serialno_read(&mut out);
        self.check(code)?;
        Ok(format_serial(&out.serial_no))
    }

    /// Push the configured defaults to the hardware.
    pub(crate) fn apply_config(&mut self) -> Result<()> {
        let config = self.config.clone();
        self.set_amplifier_on(config.amplifier_on)?;
        self.set_bias_tee_on(false)?;
        self.set_lna_gain(config.lna_gain)?;
        self.set_vga_gain(config.vga_gain)?;
        self.set_txvga_gain(config.txvga_gain)?;
        self.set_center_freq(config.center_freq)?;
        self.set_sample_rate(config.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimLibrary, SimOp};
    use crate::{DeviceConfig, TransceiverMode};

    #[test]
    fn test_gain_rounding() {
        for v in 0..200 {
            let lna = round_lna_gain(v);
            assert!(lna <= 40 && lna % 8 == 0 && lna <= v);
            let vga = round_vga_gain(v);
            assert!(vga <= 62 && vga % 2 == 0 && vga <= v);
            assert_eq!(clamp_txvga_gain(v), v.min(47));
        }
        assert_eq!(round_lna_gain(31), 24);
        assert_eq!(round_lna_gain(100), 40);
        assert_eq!(round_vga_gain(33), 32);
        assert_eq!(round_vga_gain(63), 62);
    }

    #[test]
    fn test_auto_filter_bandwidth() {
        assert_eq!(auto_filter_bandwidth(20e6), 15_000_000);
        assert_eq!(auto_filter_bandwidth(10e6), 7_000_000);
        assert_eq!(auto_filter_bandwidth(8e6), 6_000_000);
        assert_eq!(auto_filter_bandwidth(1e6), 1_750_000);
        assert_eq!(auto_filter_bandwidth(40e6), 28_000_000);
        // From 2_333_334 Hz up, 75% of the rate reaches the smallest filter.
        for rate in (2_333_334..40_000_000).step_by(333_333) {
            let bw = auto_filter_bandwidth(rate as f64);
            assert!(bw as f64 <= rate as f64 * 0.75, "rate {}", rate);
        }
        for rate in [1.0, 500_000.0, 2_000_000.0, 2_333_333.0] {
            assert_eq!(auto_filter_bandwidth(rate), BASEBAND_FILTER_VALID_VALUES[0]);
        }
    }

    #[test]
    fn test_nearest_filter_bandwidth() {
        assert_eq!(nearest_filter_bandwidth(0), 1_750_000);
        assert_eq!(nearest_filter_bandwidth(13_100_000), 14_000_000);
        assert_eq!(nearest_filter_bandwidth(12_900_000), 12_000_000);
        // Equidistant from 12 MHz and 14 MHz.
        assert_eq!(nearest_filter_bandwidth(13_000_000), 12_000_000);
        assert_eq!(nearest_filter_bandwidth(u32::MAX), 28_000_000);
    }

    #[test]
    fn test_format_serial() {
        let s = format_serial(&[0, 0x1234, 0xdeadbeef, 0x0000000a]);
        assert_eq!(s, "0000000000001234deadbeef0000000a");
        assert_eq!(s.len(), 32);
    }

    #[test]
    fn test_open_applies_defaults_in_order() {
        let sim = SimLibrary::new();
        let radio = HackRf::open(&sim, 0).unwrap();
        let record = sim.record();
        let ops: Vec<SimOp> = record
            .calls
            .iter()
            .copied()
            .filter(|op| !matches!(op, SimOp::Init | SimOp::Open))
            .collect();
        assert_eq!(
            ops,
            vec![
                SimOp::SetAmpEnable,
                SimOp::SetAntennaEnable,
                SimOp::SetLnaGain,
                SimOp::SetVgaGain,
                SimOp::SetTxvgaGain,
                SimOp::SetFreq,
                SimOp::SetSampleRate,
                SimOp::SetBasebandFilterBandwidth,
            ]
        );
        assert_eq!(radio.center_freq(), 433_200_000);
        assert_eq!(radio.filter_bandwidth(), 15_000_000);
        assert_eq!(record.settings.filter_bandwidth, 15_000_000);
        assert_eq!(
            radio.gain_settings(),
            GainSettings {
                lna_gain: 16,
                vga_gain: 16,
                txvga_gain: 10,
                amplifier_on: false,
                bias_tee_on: false,
            }
        );
    }

    #[test]
    fn test_setters_store_rounded_values() {
        let sim = SimLibrary::new();
        let mut radio = HackRf::open(&sim, 0).unwrap();
        radio.set_lna_gain(39).unwrap();
        radio.set_vga_gain(61).unwrap();
        radio.set_txvga_gain(60).unwrap();
        radio.set_amplifier_on(true).unwrap();
        assert_eq!(radio.lna_gain(), 32);
        assert_eq!(radio.vga_gain(), 60);
        assert_eq!(radio.txvga_gain(), 47);
        assert!(radio.amplifier_on());

        let settings = sim.record().settings;
        assert_eq!(settings.lna_gain, 32);
        assert_eq!(settings.vga_gain, 60);
        assert_eq!(settings.txvga_gain, 47);
        assert!(settings.amp_enable);

        radio.set_sample_rate(10e6).unwrap();
        assert_eq!(radio.filter_bandwidth(), 7_000_000);
        radio.set_filter_bandwidth(9_400_000).unwrap();
        assert_eq!(radio.filter_bandwidth(), 9_000_000);
        assert_eq!(radio.sample_rate(), 10e6);
        assert_eq!(
            radio.frequency_parameters(),
            FrequencyParameters {
                center_freq: 433_200_000,
                sample_rate: 10e6,
                filter_bandwidth: 9_000_000,
            }
        );
    }

    #[test]
    fn test_invalid_sample_rate() {
        let sim = SimLibrary::new();
        let mut radio = HackRf::open(&sim, 0).unwrap();
        let before = sim.record().calls.len();
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                radio.set_sample_rate(rate),
                Err(Error::Parameter { name: "sample_rate", .. })
            ));
        }
        assert_eq!(sim.record().calls.len(), before);
    }

    #[test]
    fn test_serial_number() {
        let sim = SimLibrary::with_config(SimConfig {
            serial_no: [0x0, 0x0, 0x457863c8, 0x2b7b5c4f],
            ..SimConfig::default()
        });
        let mut radio = HackRf::open(&sim, 0).unwrap();
        assert_eq!(radio.get_serial_no().unwrap(), "0000000000000000457863c82b7b5c4f");
    }

    #[test]
    fn test_setter_fault_shuts_down() {
        let sim = SimLibrary::new();
        let mut radio = HackRf::open(&sim, 0).unwrap();
        radio.set_bias_tee_on(true).unwrap();
        assert!(radio.bias_tee_on());

        sim.fail_next(SimOp::SetFreq, -2);
        let err = radio.set_center_freq(2_440_000_000).unwrap_err();
        assert!(matches!(err, Error::Driver { code: -2, .. }));
        assert_eq!(err.to_string(), "Invalid parameter (HACKRF_ERROR_INVALID_PARAM)");
        assert_eq!(radio.center_freq(), 433_200_000);
        assert!(!radio.bias_tee_on());
        assert_eq!(radio.mode(), TransceiverMode::Off);
        assert!(!radio.is_open());
        assert!(matches!(radio.set_lna_gain(8), Err(Error::Closed)));
        assert_eq!(sim.record().open_devices, 0);
    }

    #[test]
    fn test_open_fault_during_defaults() {
        let sim = SimLibrary::new();
        sim.fail_next(SimOp::SetSampleRate, -1000);
        let config = DeviceConfig::default();
        assert!(HackRf::open_with_config(&sim, 0, config).err().unwrap().is_fatal());
        let record = sim.record();
        assert_eq!(record.open_devices, 0);
        assert_eq!(record.count(SimOp::Close), 1);
    }
}
