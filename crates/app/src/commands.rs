// Copyright 2025-2026 CEMAXECUTER LLC

use std::time::{Duration, Instant};

use crossbeam::channel;
use num_complex::Complex64;

use hrf_sdr::codec;
use hrf_sdr::driver::Library;
use hrf_sdr::{DeviceConfig, HackRf, SweepBand, SweepFrame, SweepPlan};

/// Parse `START:END` bands given in MHz.
pub fn parse_bands(specs: &[String]) -> hrf_sdr::Result<Vec<SweepBand>> {
    specs
        .iter()
        .map(|arg| {
            let parsed = arg.split_once(':').and_then(|(start, end)| {
                let start: f64 = start.trim().parse().ok()?;
                let end: f64 = end.trim().parse().ok()?;
                Some(SweepBand::new((start * 1e6) as u64, (end * 1e6) as u64))
            });
            parsed.ok_or_else(|| hrf_sdr::Error::Parameter {
                name: "band",
                reason: format!("expected START:END in MHz, got '{}'", arg),
            })
        })
        .collect()
}

/// Mean power in dB relative to full scale.
fn power_db(samples: &[Complex64]) -> f64 {
    if samples.is_empty() {
        return f64::NEG_INFINITY;
    }
    let mean = samples.iter().map(|s| s.norm_sqr()).sum::<f64>() / samples.len() as f64;
    10.0 * mean.log10()
}

fn mean(samples: &[Complex64]) -> Complex64 {
    if samples.is_empty() {
        return Complex64::new(0.0, 0.0);
    }
    samples.iter().sum::<Complex64>() / samples.len() as f64
}

pub fn info(lib: &dyn Library, index: usize, config: DeviceConfig) -> hrf_sdr::Result<()> {
    let serials = HackRf::enumerate(lib)?;
    println!("Found {} HackRF device(s)", serials.len());
    for (i, serial) in serials.iter().enumerate() {
        println!("  [{}] {}", i, serial);
    }

    let mut radio = HackRf::open_with_config(lib, index, config)?;
    let freq = radio.frequency_parameters();
    let gain = radio.gain_settings();
    println!("Device {}:", index);
    println!("  serial:       {}", radio.get_serial_no()?);
    println!("  center freq:  {:.3} MHz", freq.center_freq as f64 / 1e6);
    println!("  sample rate:  {:.3} MS/s", freq.sample_rate / 1e6);
    println!("  filter:       {:.2} MHz", freq.filter_bandwidth as f64 / 1e6);
    println!(
        "  gains:        LNA {} dB, VGA {} dB, TXVGA {} dB, amp {}",
        gain.lna_gain,
        gain.vga_gain,
        gain.txvga_gain,
        if gain.amplifier_on { "on" } else { "off" }
    );
    Ok(())
}

pub fn read(
    lib: &dyn Library,
    index: usize,
    config: DeviceConfig,
    num_samples: usize,
) -> hrf_sdr::Result<()> {
    let mut radio = HackRf::open_with_config(lib, index, config)?;
    let start = Instant::now();
    let samples = radio.read_samples(num_samples)?;
    let elapsed = start.elapsed();

    let dc = mean(&samples);
    println!("Samples:    {}", samples.len());
    println!("Elapsed:    {:.3}s", elapsed.as_secs_f64());
    println!("Power:      {:.2} dBFS", power_db(&samples));
    println!("Mean I/Q:   {:.4} {:+.4}j", dc.re, dc.im);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn sweep(
    lib: &dyn Library,
    index: usize,
    config: DeviceConfig,
    bands: &[SweepBand],
    frames: usize,
    bytes_per_step: u32,
    step_width: u32,
    interleaved: bool,
) -> hrf_sdr::Result<()> {
    let timeout = config.read_timeout();
    let mut radio = HackRf::open_with_config(lib, index, config)?;
    let plan = SweepPlan::new(bands.iter().copied())
        .bytes_per_step(bytes_per_step)
        .step_width(step_width)
        .interleaved(interleaved);

    let wanted = frames.max(1);
    let (tx, rx) = channel::bounded::<SweepFrame>(wanted);
    let mut seen = 0usize;
    radio.start_sweep(
        &plan,
        Some(Box::new(move |frame: &SweepFrame| {
            let _ = tx.try_send(frame.clone());
            seen += 1;
            seen >= wanted
        })),
    )?;

    let waited = radio.wait_idle(timeout);
    radio.stop_rx()?;
    waited?;

    let mut total_steps = 0usize;
    for (n, frame) in rx.try_iter().enumerate() {
        println!("Frame {}:", n);
        for (freq, payload) in &frame {
            let samples = codec::decode(payload);
            println!("  {:>10.3} MHz  {:>7.2} dB", *freq as f64 / 1e6, power_db(&samples));
        }
        total_steps += frame.len();
    }
    log::info!("sweep complete: {} frames, {} steps", wanted, total_steps);
    Ok(())
}

pub fn replay(
    lib: &dyn Library,
    index: usize,
    config: DeviceConfig,
    num_samples: usize,
    tx_freq: Option<u64>,
) -> hrf_sdr::Result<()> {
    let timeout = config.read_timeout();
    let mut radio = HackRf::open_with_config(lib, index, config)?;

    radio.set_sample_count_limit((num_samples * codec::BYTES_PER_SAMPLE) as u64);
    radio.start_rx(None)?;
    let waited = radio.wait_idle(timeout);
    radio.stop_rx()?;
    waited?;

    let recorded = radio.queue_buffer_for_tx();
    println!("Recorded {} bytes", recorded);

    if let Some(freq) = tx_freq {
        radio.set_center_freq(freq)?;
    }
    let start = Instant::now();
    radio.start_tx()?;
    // Allow for the transmit taking about as long as the capture did.
    let waited = radio.wait_idle(timeout + Duration::from_secs(1));
    radio.stop_tx()?;
    let reason = waited?;

    println!(
        "Transmitted {} bytes in {:.3}s ({:?})",
        radio.sample_count(),
        start.elapsed().as_secs_f64(),
        reason
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrf_sdr::sim::{SimConfig, SimLibrary, SimOp};

    #[test]
    fn test_parse_bands() {
        let bands = parse_bands(&["2400:2483.5".to_string(), "915 : 902".to_string()]).unwrap();
        assert_eq!(bands[0], SweepBand::new(2_400_000_000, 2_483_500_000));
        assert_eq!(bands[1].normalized(), (902_000_000, 915_000_000));
        assert!(parse_bands(&["2400".to_string()]).is_err());
        assert!(parse_bands(&["a:b".to_string()]).is_err());
    }

    #[test]
    fn test_power_db() {
        let samples = vec![Complex64::new(1.0, 0.0); 8];
        assert!(power_db(&samples).abs() < 1e-12);
        assert_eq!(power_db(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_replay_against_simulator() {
        let sim = SimLibrary::with_config(SimConfig::default().with_transfer_size(4096));
        replay(&sim, 0, DeviceConfig::default(), 3000, Some(915_000_000)).unwrap();
        let record = sim.record();
        assert_eq!(record.transmitted.concat().len(), 6000);
        assert_eq!(record.settings.center_freq, 915_000_000);
        assert_eq!(record.count(SimOp::StartTx), 1);
        assert_eq!(record.open_devices, 0);
    }

    #[test]
    fn test_sweep_against_simulator() {
        let sim = SimLibrary::with_config(SimConfig::default().with_transfer_size(16 * 1024));
        let bands = parse_bands(&["100:110".to_string()]).unwrap();
        sweep(&sim, 0, DeviceConfig::default(), &bands, 2, 16_384, 1_000_000, true).unwrap();
        assert_eq!(sim.record().count(SimOp::StartRxSweep), 1);
    }
}
