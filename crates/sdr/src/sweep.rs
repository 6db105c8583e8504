// Copyright 2025-2026 CEMAXECUTER LLC

//! Frequency sweep: plan validation and transfer demultiplexing.
//!
//! A sweep transfer carries `BLOCKS_PER_TRANSFER` equally sized blocks, one
//! per tuning step. Block layout as written by the sweep firmware:
//!
//! ```text
//! [0, 2)      unused
//! [2, 10)     center frequency tag, u64 little-endian, Hz
//! [10]        unused
//! [11, size)  I/Q payload
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::driver::{SweepRequest, Transfer, TransferCallback, CONTINUE, STOP};
use crate::error::{Error, Result};
use crate::stream::{Shared, Sink, StopReason, StreamKind, StreamState};
use crate::{HackRf, TransceiverMode};

pub const BLOCKS_PER_TRANSFER: usize = 16;
/// Bytes per step must be a multiple of this.
pub const BYTES_PER_BLOCK: u32 = 16_384;
pub const MAX_SWEEP_RANGES: usize = 10;

const FREQ_TAG_START: usize = 2;
const FREQ_TAG_END: usize = 10;
const PAYLOAD_OFFSET: usize = 11;

const HZ_PER_MHZ: u64 = 1_000_000;

/// Payload per tuning frequency for one transfer.
pub type SweepFrame = BTreeMap<u64, Vec<u8>>;

/// Receives one demultiplexed transfer on the driver thread. Returning
/// `true` ends the sweep.
pub type SweepSink = Box<dyn FnMut(&SweepFrame) -> bool + Send>;

/// A band to sweep, edges in Hz. Edges may be given in either order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepBand {
    pub start: u64,
    pub end: u64,
}

impl SweepBand {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// `(low, high)` edges.
    pub fn normalized(&self) -> (u64, u64) {
        (self.start.min(self.end), self.start.max(self.end))
    }
}

impl From<(u64, u64)> for SweepBand {
    fn from((start, end): (u64, u64)) -> Self {
        Self::new(start, end)
    }
}

/// Sweep configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    pub bands: Vec<SweepBand>,
    /// Bytes collected per tuning step, a positive multiple of 16384
    pub bytes_per_step: u32,
    /// Tuning step in Hz
    pub step_width: u32,
    /// Offset added to each tuning frequency, Hz. Half the sample rate when `None`.
    pub step_offset: Option<u32>,
    pub interleaved: bool,
}

impl SweepPlan {
    pub fn new<B: Into<SweepBand>>(bands: impl IntoIterator<Item = B>) -> Self {
        Self {
            bands: bands.into_iter().map(Into::into).collect(),
            bytes_per_step: BYTES_PER_BLOCK,
            step_width: 1_000_000,
            step_offset: None,
            interleaved: true,
        }
    }

    pub fn bytes_per_step(mut self, bytes: u32) -> Self {
        self.bytes_per_step = bytes;
        self
    }

    pub fn step_width(mut self, hz: u32) -> Self {
        self.step_width = hz;
        self
    }

    pub fn step_offset(mut self, hz: u32) -> Self {
        self.step_offset = Some(hz);
        self
    }

    pub fn interleaved(mut self, interleaved: bool) -> Self {
        self.interleaved = interleaved;
        self
    }

    /// Validate and convert to driver units.
    pub fn to_request(&self, sample_rate: f64) -> Result<SweepRequest> {
        if self.bands.is_empty() {
            return Err(Error::parameter("bands", "at least one band is required"));
        }
        if self.bands.len() > MAX_SWEEP_RANGES {
            return Err(Error::parameter(
                "bands",
                format!(
                    "number of sweep ranges must be less than or equal to {} (got {})",
                    MAX_SWEEP_RANGES,
                    self.bands.len()
                ),
            ));
        }
        if self.bytes_per_step == 0 || self.bytes_per_step % BYTES_PER_BLOCK != 0 {
            return Err(Error::parameter(
                "bytes_per_step",
                format!(
                    "must be a positive multiple of {} (got {})",
                    BYTES_PER_BLOCK, self.bytes_per_step
                ),
            ));
        }

        let mut frequencies_mhz = Vec::with_capacity(self.bands.len() * 2);
        for band in &self.bands {
            let (low, high) = band.normalized();
            frequencies_mhz.push(to_mhz(low / HZ_PER_MHZ)?);
            frequencies_mhz.push(to_mhz(high.div_ceil(HZ_PER_MHZ))?);
        }

        let step_offset = match self.step_offset {
            Some(offset) => offset,
            None => {
                let half = sample_rate / 2.0;
                if !half.is_finite() || half < 0.0 || half > u32::MAX as f64 {
                    return Err(Error::parameter(
                        "step_offset",
                        format!("cannot derive from sample rate {}", sample_rate),
                    ));
                }
                half as u32
            }
        };

        Ok(SweepRequest {
            frequencies_mhz,
            bytes_per_step: self.bytes_per_step,
            step_width: self.step_width,
            step_offset,
            interleaved: self.interleaved,
        })
    }
}

fn to_mhz(mhz: u64) -> Result<u16> {
    u16::try_from(mhz).map_err(|_| {
        Error::parameter("bands", format!("band edge {} MHz is out of range", mhz))
    })
}

/// Split one sweep transfer into per-frequency payloads.
///
/// Returns `None` when the transfer is too short to hold a tagged block.
pub fn demux(transfer: &[u8]) -> Option<SweepFrame> {
    let block_size = transfer.len() / BLOCKS_PER_TRANSFER;
    if block_size < PAYLOAD_OFFSET {
        return None;
    }

    let frame = transfer
        .chunks_exact(block_size)
        .take(BLOCKS_PER_TRANSFER)
        .map(|block| {
            let freq = LittleEndian::read_u64(&block[FREQ_TAG_START..FREQ_TAG_END]);
            (freq, block[PAYLOAD_OFFSET..].to_vec())
        })
        .collect();
    Some(frame)
}

impl StreamState {
    pub(crate) fn on_sweep(&mut self, data: &[u8]) -> i32 {
        let Some(session) = self.session.as_mut() else {
            return STOP;
        };

        let Some(frame) = demux(data) else {
            log::warn!("sweep transfer too short to demultiplex ({} bytes)", data.len());
            return CONTINUE;
        };
        self.sample_count += frame.values().map(|p| p.len() as u64).sum::<u64>();

        let stop = match &mut session.sink {
            Sink::Sweep(Some(sink)) => sink(&frame),
            _ => false,
        };
        if stop {
            self.finish(StopReason::SinkRequested);
            STOP
        } else {
            CONTINUE
        }
    }
}

struct SweepCallback {
    shared: Arc<Shared>,
}

impl TransferCallback for SweepCallback {
    fn on_transfer(&self, transfer: &mut Transfer<'_>) -> i32 {
        self.shared.lock().on_sweep(transfer.valid())
    }
}

impl HackRf {
    /// Start a receive sweep. Without a sink the data is discarded; the sweep
    /// then runs until `stop_rx`.
    pub fn start_sweep(&mut self, plan: &SweepPlan, sink: Option<SweepSink>) -> Result<()> {
        let request = plan.to_request(self.sample_rate())?;
        self.ensure_open()?;
        self.require_idle("start sweeping")?;
        self.reap()?;

        let code = self.device_mut()?.init_sweep(&request);
        self.check(code)?;

        let done = self.begin(TransceiverMode::Sweeping, Sink::Sweep(sink), 0);
        let callback = Arc::new(SweepCallback {
            shared: self.shared.clone(),
        });
        self.launch(StreamKind::Sweep, callback, done)?;
        log::info!(
            "HackRF sweep started ({} bands, {} bytes/step, step {} Hz, offset {} Hz)",
            request.num_ranges(),
            request.bytes_per_step,
            request.step_width,
            request.step_offset
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimLibrary, SimOp};
    use crate::stream::AcquisitionSession;
    use byteorder::WriteBytesExt;
    use crossbeam::channel::bounded;
    use std::time::Duration;

    fn synthetic_transfer(block_size: usize, base_freq: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(block_size * BLOCKS_PER_TRANSFER);
        for i in 0..BLOCKS_PER_TRANSFER {
            buf.push(0x7f);
            buf.push(0x7f);
            buf.write_u64::<LittleEndian>(base_freq + i as u64 * 1_000_000).unwrap();
            buf.push(0xee);
            for j in PAYLOAD_OFFSET..block_size {
                buf.push((i * 16 + j) as u8);
            }
        }
        buf
    }

    #[test]
    fn test_demux_sixteen_blocks() {
        let block_size = 64;
        let transfer = synthetic_transfer(block_size, 2_400_000_000);
        let frame = demux(&transfer).unwrap();
        assert_eq!(frame.len(), 16);
        for i in 0..BLOCKS_PER_TRANSFER {
            let block = &transfer[i * block_size..(i + 1) * block_size];
            let payload = &frame[&(2_400_000_000 + i as u64 * 1_000_000)];
            assert_eq!(payload.as_slice(), &block[PAYLOAD_OFFSET..]);
            assert_eq!(payload.len(), block_size - PAYLOAD_OFFSET);
        }
    }

    #[test]
    fn test_demux_skips_byte_ten() {
        let transfer = synthetic_transfer(32, 100);
        let frame = demux(&transfer).unwrap();
        // 0xee sits at offset 10 of every block and must not leak into payloads
        assert!(frame.values().all(|p| p[0] != 0xee));
    }

    #[test]
    fn test_demux_short_transfer() {
        assert!(demux(&[0u8; 16 * 10]).is_none());
        assert!(demux(&[]).is_none());
    }

    #[test]
    fn test_plan_normalizes_bands() {
        let plan = SweepPlan::new([(200_000_000u64, 120_000_000u64), (500_500_000, 700_000_000)]);
        let req = plan.to_request(20e6).unwrap();
        assert_eq!(req.frequencies_mhz, vec![120, 200, 500, 700]);
        assert_eq!(req.step_offset, 10_000_000);
        assert_eq!(req.bytes_per_step, 16_384);
        assert_eq!(req.step_width, 1_000_000);
        assert!(req.interleaved);
    }

    #[test]
    fn test_plan_rounds_band_outward() {
        let req = SweepPlan::new([(2_400_500_000u64, 2_483_200_000u64)])
            .step_offset(7_500_000)
            .interleaved(false)
            .to_request(20e6)
            .unwrap();
        assert_eq!(req.frequencies_mhz, vec![2400, 2484]);
        assert_eq!(req.step_offset, 7_500_000);
        assert!(!req.interleaved);
    }

    #[test]
    fn test_plan_rejects_too_many_bands() {
        let bands: Vec<(u64, u64)> = (0..11).map(|i| (i * 10_000_000, i * 10_000_000 + 5_000_000)).collect();
        let err = SweepPlan::new(bands).to_request(20e6).unwrap_err();
        assert!(matches!(err, Error::Parameter { name: "bands", .. }));
    }

    #[test]
    fn test_plan_rejects_bad_step_bytes() {
        for bytes in [0, 1000, 16_385] {
            let err = SweepPlan::new([(1u64, 2u64)])
                .bytes_per_step(bytes)
                .to_request(20e6)
                .unwrap_err();
            assert!(matches!(err, Error::Parameter { name: "bytes_per_step", .. }));
        }
        assert!(SweepPlan::new([(1u64, 2u64)])
            .bytes_per_step(3 * 16_384)
            .to_request(20e6)
            .is_ok());
    }

    #[test]
    fn test_plan_rejects_out_of_range_edge() {
        let err = SweepPlan::new([(0u64, 70_000_000_000u64)]).to_request(20e6).unwrap_err();
        assert!(matches!(err, Error::Parameter { .. }));
    }

    #[test]
    fn test_sweep_callback_without_sink_continues() {
        let (done, _rx) = bounded(1);
        let mut state = StreamState::new();
        state.mode = TransceiverMode::Sweeping;
        state.session = Some(AcquisitionSession::new(0, Sink::Sweep(None), done));
        assert_eq!(state.on_sweep(&synthetic_transfer(64, 0)), CONTINUE);
        assert_eq!(state.sample_count, 16 * (64 - 11) as u64);
        assert_eq!(state.mode, TransceiverMode::Sweeping);
    }

    #[test]
    fn test_invalid_plan_makes_no_driver_call() {
        let sim = SimLibrary::new();
        let mut radio = HackRf::open(&sim, 0).unwrap();
        let before = sim.record().calls.len();
        let plan = SweepPlan::new([(1u64, 2u64)]).bytes_per_step(100);
        assert!(radio.start_sweep(&plan, None).is_err());
        assert_eq!(sim.record().calls.len(), before);
        assert!(radio.is_open());
    }

    #[test]
    fn test_sweep_stops_after_one_frame() {
        let sim = SimLibrary::with_config(SimConfig::default().with_transfer_size(16 * 1024));
        let mut radio = HackRf::open(&sim, 0).unwrap();
        let (tx, rx) = bounded::<SweepFrame>(4);
        let plan = SweepPlan::new([(2_400_000_000u64, 2_410_000_000u64)]);
        radio
            .start_sweep(
                &plan,
                Some(Box::new(move |frame| {
                    let _ = tx.try_send(frame.clone());
                    true
                })),
            )
            .unwrap();

        assert_eq!(
            radio.wait_idle(Duration::from_secs(5)).unwrap(),
            StopReason::SinkRequested
        );
        let frame = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(!frame.is_empty());
        assert!(frame.values().all(|p| p.len() == 1024 - PAYLOAD_OFFSET));
        assert!(frame.keys().all(|f| (2_400_000_000..2_410_000_000).contains(f)));
        radio.stop_rx().unwrap();

        let record = sim.record();
        assert_eq!(record.count(SimOp::InitSweep), 1);
        assert_eq!(record.count(SimOp::StartRxSweep), 1);
        assert_eq!(record.count(SimOp::StopRx), 1);
        let req = record.sweep.as_ref().unwrap();
        assert_eq!(req.frequencies_mhz, vec![2400, 2410]);
        assert_eq!(req.step_offset, 10_000_000);
    }

    #[test]
    fn test_init_sweep_failure_shuts_down() {
        let sim = SimLibrary::new();
        let mut radio = HackRf::open(&sim, 0).unwrap();
        sim.fail_next(SimOp::InitSweep, -2);
        let err = radio
            .start_sweep(&SweepPlan::new([(1_000_000u64, 6_000_000u64)]), None)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!radio.is_open());
        assert_eq!(radio.mode(), TransceiverMode::Off);
    }
}
