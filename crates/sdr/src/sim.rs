// Copyright 2025-2026 CEMAXECUTER LLC

//! In-process HackRF simulator.
//!
//! Implements the driver contract without hardware. Streams run on their own
//! thread and call back exactly like libhackrf does; every driver call is
//! recorded, and any call can be made to fail once with a chosen status code.
//!
//! Generated data:
//! - RX: a running byte counter starting at 0 for each stream
//! - sweep: 16 tagged blocks per transfer, tuning frequencies walked in
//!   `step_width` increments across the requested bands
//! - TX: every non-empty chunk the callback fills is kept in
//!   [`SimRecord::transmitted`]
//!
//! A stop call with an injected failure leaves the stream running until the
//! device is closed, as a failed libhackrf stop does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};

use crate::driver::{
    stream_stopped, Device, Library, PartIdSerialNo, SweepRequest, Transfer, TransferCallback,
    TRANSFER_BUFFER_SIZE,
};
use crate::sweep::BLOCKS_PER_TRANSFER;

const HACKRF_ERROR_INVALID_PARAM: i32 = -2;
const HACKRF_ERROR_NOT_FOUND: i32 = -5;
const HACKRF_ERROR_BUSY: i32 = -6;
const HACKRF_ERROR_THREAD: i32 = -1001;

const SIM_PART_ID: [u32; 2] = [0xa000_cb3c, 0x0057_435f];

/// Driver operations, as recorded by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Init,
    Open,
    Close,
    SetFreq,
    SetSampleRate,
    SetBasebandFilterBandwidth,
    SetLnaGain,
    SetVgaGain,
    SetTxvgaGain,
    SetAmpEnable,
    SetAntennaEnable,
    StartRx,
    StopRx,
    StartTx,
    StopTx,
    InitSweep,
    StartRxSweep,
    ReadSerial,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Serial numbers reported by enumeration; one simulated board each
    pub serials: Vec<String>,
    /// Words returned by the serial number read
    pub serial_no: [u32; 4],
    /// Bytes per transfer
    pub transfer_size: usize,
    /// Pause between transfers
    pub transfer_interval: Duration,
    /// Streams start but never deliver a transfer
    pub stalled: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            serials: vec!["0000000000000000457863c82b7b5c4f".to_string()],
            serial_no: [0, 0, 0x4578_63c8, 0x2b7b_5c4f],
            transfer_size: TRANSFER_BUFFER_SIZE,
            transfer_interval: Duration::from_micros(200),
            stalled: false,
        }
    }
}

impl SimConfig {
    pub fn with_transfer_size(mut self, bytes: usize) -> Self {
        self.transfer_size = bytes;
        self
    }

    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }
}

/// Last values accepted by the simulated hardware.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SimSettings {
    pub center_freq: u64,
    pub sample_rate: f64,
    pub filter_bandwidth: u32,
    pub lna_gain: u32,
    pub vga_gain: u32,
    pub txvga_gain: u32,
    pub amp_enable: bool,
    pub antenna_enable: bool,
}

/// Everything the simulator observed.
#[derive(Debug, Clone, Default)]
pub struct SimRecord {
    /// Every driver call in order, failed ones included
    pub calls: Vec<SimOp>,
    pub transmitted: Vec<Vec<u8>>,
    /// Last accepted sweep configuration
    pub sweep: Option<SweepRequest>,
    pub settings: SimSettings,
    /// Devices opened and not yet closed
    pub open_devices: usize,
}

impl SimRecord {
    pub fn count(&self, op: SimOp) -> usize {
        self.calls.iter().filter(|&&c| c == op).count()
    }
}

struct SimInner {
    config: SimConfig,
    record: Mutex<SimRecord>,
    faults: Mutex<HashMap<SimOp, i32>>,
}

impl SimInner {
    fn record(&self) -> MutexGuard<'_, SimRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `op` and return its injected status, if any.
    fn call(&self, op: SimOp) -> i32 {
        self.record().calls.push(op);
        let code = self
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&op)
            .unwrap_or(0);
        if code != 0 {
            log::debug!("sim: injecting status {} into {:?}", code, op);
        }
        code
    }

    fn apply(&self, op: SimOp, update: impl FnOnce(&mut SimSettings)) -> i32 {
        let code = self.call(op);
        if code == 0 {
            update(&mut self.record().settings);
        }
        code
    }
}

/// Simulated libhackrf. Clones share the same boards and record.
#[derive(Clone)]
pub struct SimLibrary {
    inner: Arc<SimInner>,
}

impl SimLibrary {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        Self {
            inner: Arc::new(SimInner {
                config,
                record: Mutex::new(SimRecord::default()),
                faults: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Snapshot of the calls and data seen so far.
    pub fn record(&self) -> SimRecord {
        self.inner.record().clone()
    }

    /// Make the next call of `op` return `code`.
    pub fn fail_next(&self, op: SimOp, code: i32) {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op, code);
    }
}

impl Default for SimLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl Library for SimLibrary {
    fn init(&self) -> i32 {
        self.inner.call(SimOp::Init)
    }

    fn device_list(&self) -> Vec<String> {
        self.inner.config.serials.clone()
    }

    fn open(&self, index: usize) -> Result<Box<dyn Device>, i32> {
        let code = self.inner.call(SimOp::Open);
        if code != 0 {
            return Err(code);
        }
        if index >= self.inner.config.serials.len() {
            return Err(HACKRF_ERROR_NOT_FOUND);
        }
        self.inner.record().open_devices += 1;
        Ok(Box::new(SimDevice {
            inner: self.inner.clone(),
            stream: None,
            sweep: None,
            open: true,
        }))
    }
}

enum Work {
    Rx,
    Tx,
    Sweep(SweepRequest),
}

struct SimStream {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct SimDevice {
    inner: Arc<SimInner>,
    stream: Option<SimStream>,
    sweep: Option<SweepRequest>,
    open: bool,
}

impl SimDevice {
    fn spawn(&mut self, work: Work, callback: Arc<dyn TransferCallback>) -> i32 {
        if self.stream.is_some() {
            return HACKRF_ERROR_BUSY;
        }

        let name = match work {
            Work::Rx => "hackrf-sim-rx",
            Work::Tx => "hackrf-sim-tx",
            Work::Sweep(_) => "hackrf-sim-sweep",
        };
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_stream(&inner, work, callback.as_ref(), &thread_stop));

        match spawned {
            Ok(handle) => {
                self.stream = Some(SimStream { stop, handle });
                0
            }
            Err(e) => {
                log::error!("sim: failed to spawn streaming thread: {}", e);
                HACKRF_ERROR_THREAD
            }
        }
    }

    /// Stop the streaming thread and wait for it.
    fn halt(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop.store(true, Ordering::SeqCst);
            if stream.handle.join().is_err() {
                log::warn!("sim: streaming thread panicked");
            }
        }
    }
}

impl Device for SimDevice {
    fn close(&mut self) -> i32 {
        let code = self.inner.call(SimOp::Close);
        self.halt();
        if self.open {
            self.open = false;
            self.inner.record().open_devices -= 1;
        }
        code
    }

    fn set_freq(&mut self, freq_hz: u64) -> i32 {
        self.inner.apply(SimOp::SetFreq, |s| s.center_freq = freq_hz)
    }

    fn set_sample_rate(&mut self, rate_hz: f64) -> i32 {
        self.inner.apply(SimOp::SetSampleRate, |s| s.sample_rate = rate_hz)
    }

    fn set_baseband_filter_bandwidth(&mut self, bandwidth_hz: u32) -> i32 {
        self.inner
            .apply(SimOp::SetBasebandFilterBandwidth, |s| s.filter_bandwidth = bandwidth_hz)
    }

    fn set_lna_gain(&mut self, value: u32) -> i32 {
        self.inner.apply(SimOp::SetLnaGain, |s| s.lna_gain = value)
    }

    fn set_vga_gain(&mut self, value: u32) -> i32 {
        self.inner.apply(SimOp::SetVgaGain, |s| s.vga_gain = value)
    }

    fn set_txvga_gain(&mut self, value: u32) -> i32 {
        self.inner.apply(SimOp::SetTxvgaGain, |s| s.txvga_gain = value)
    }

    fn set_amp_enable(&mut self, enable: bool) -> i32 {
        self.inner.apply(SimOp::SetAmpEnable, |s| s.amp_enable = enable)
    }

    fn set_antenna_enable(&mut self, enable: bool) -> i32 {
        self.inner.apply(SimOp::SetAntennaEnable, |s| s.antenna_enable = enable)
    }

    fn start_rx(&mut self, callback: Arc<dyn TransferCallback>) -> i32 {
        match self.inner.call(SimOp::StartRx) {
            0 => self.spawn(Work::Rx, callback),
            code => code,
        }
    }

    fn stop_rx(&mut self) -> i32 {
        let code = self.inner.call(SimOp::StopRx);
        if stream_stopped(code) {
            self.halt();
        }
        code
    }

    fn start_tx(&mut self, callback: Arc<dyn TransferCallback>) -> i32 {
        match self.inner.call(SimOp::StartTx) {
            0 => self.spawn(Work::Tx, callback),
            code => code,
        }
    }

    fn stop_tx(&mut self) -> i32 {
        let code = self.inner.call(SimOp::StopTx);
        if stream_stopped(code) {
            self.halt();
        }
        code
    }

    fn init_sweep(&mut self, request: &SweepRequest) -> i32 {
        let code = self.inner.call(SimOp::InitSweep);
        if code == 0 {
            self.sweep = Some(request.clone());
            self.inner.record().sweep = Some(request.clone());
        }
        code
    }

    fn start_rx_sweep(&mut self, callback: Arc<dyn TransferCallback>) -> i32 {
        let code = self.inner.call(SimOp::StartRxSweep);
        if code != 0 {
            return code;
        }
        match self.sweep.clone() {
            Some(request) => self.spawn(Work::Sweep(request), callback),
            None => HACKRF_ERROR_INVALID_PARAM,
        }
    }

    fn board_partid_serialno_read(&mut self, out: &mut PartIdSerialNo) -> i32 {
        let code = self.inner.call(SimOp::ReadSerial);
        if code == 0 {
            out.part_id = SIM_PART_ID;
            out.serial_no = self.inner.config.serial_no;
        }
        code
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.halt();
    }
}

fn run_stream(inner: &SimInner, work: Work, callback: &dyn TransferCallback, stop: &AtomicBool) {
    let config = &inner.config;
    let mut buffer = vec![0u8; config.transfer_size];
    let mut counter: u8 = 0;
    let mut step = 0usize;
    let tunings = match &work {
        Work::Sweep(request) => tuning_frequencies(request),
        _ => Vec::new(),
    };

    while !stop.load(Ordering::SeqCst) {
        if config.stalled {
            thread::sleep(config.transfer_interval.max(Duration::from_millis(1)));
            continue;
        }

        let ret = match &work {
            Work::Rx => {
                for b in buffer.iter_mut() {
                    *b = counter;
                    counter = counter.wrapping_add(1);
                }
                let len = buffer.len();
                callback.on_transfer(&mut Transfer::new(&mut buffer, len))
            }
            Work::Tx => {
                let mut transfer = Transfer::new(&mut buffer, 0);
                let ret = callback.on_transfer(&mut transfer);
                if transfer.valid_length() > 0 {
                    inner.record().transmitted.push(transfer.valid().to_vec());
                }
                ret
            }
            Work::Sweep(_) => {
                fill_sweep_transfer(&mut buffer, &tunings, &mut step, &mut counter);
                let len = buffer.len();
                callback.on_transfer(&mut Transfer::new(&mut buffer, len))
            }
        };
        if ret != 0 {
            break;
        }
        if !config.transfer_interval.is_zero() {
            thread::sleep(config.transfer_interval);
        }
    }
}

fn tuning_frequencies(request: &SweepRequest) -> Vec<u64> {
    let step = u64::from(request.step_width.max(1));
    let mut out = Vec::new();
    for pair in request.frequencies_mhz.chunks_exact(2) {
        let low = u64::from(pair[0]) * 1_000_000;
        let high = u64::from(pair[1]) * 1_000_000;
        let mut f = low;
        while f < high {
            out.push(f);
            f += step;
        }
        if low == high {
            out.push(low);
        }
    }
    out
}

fn fill_sweep_transfer(buffer: &mut [u8], tunings: &[u64], step: &mut usize, counter: &mut u8) {
    let block_size = buffer.len() / BLOCKS_PER_TRANSFER;
    if block_size < 11 || tunings.is_empty() {
        return;
    }
    for block in buffer.chunks_exact_mut(block_size).take(BLOCKS_PER_TRANSFER) {
        block[0] = 0x7f;
        block[1] = 0x7f;
        LittleEndian::write_u64(&mut block[2..10], tunings[*step % tunings.len()]);
        block[10] = 0;
        for b in block[11..].iter_mut() {
            *b = *counter;
            *counter = counter.wrapping_add(1);
        }
        *step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{CONTINUE, STOP};
    use crate::sweep::demux;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        calls: AtomicUsize,
        stop_after: usize,
    }

    impl TransferCallback for Counting {
        fn on_transfer(&self, transfer: &mut Transfer<'_>) -> i32 {
            assert!(transfer.valid_length() <= transfer.buffer_length());
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.stop_after {
                STOP
            } else {
                CONTINUE
            }
        }
    }

    fn open(sim: &SimLibrary) -> Box<dyn Device> {
        assert_eq!(sim.init(), 0);
        sim.open(0).ok().unwrap()
    }

    #[test]
    fn test_callback_stop_ends_thread() {
        let sim = SimLibrary::with_config(SimConfig::default().with_transfer_size(64));
        let mut dev = open(&sim);
        let cb = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            stop_after: 5,
        });
        assert_eq!(dev.start_rx(cb.clone()), 0);
        assert_eq!(dev.stop_rx(), 0);
        assert!(cb.calls.load(Ordering::SeqCst) <= 5);
        assert_eq!(dev.close(), 0);
        assert_eq!(sim.record().open_devices, 0);
    }

    #[test]
    fn test_second_start_is_busy() {
        let sim = SimLibrary::with_config(SimConfig::default().with_transfer_size(64).stalled());
        let mut dev = open(&sim);
        let cb = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            stop_after: usize::MAX,
        });
        assert_eq!(dev.start_rx(cb.clone()), 0);
        assert_eq!(dev.start_tx(cb.clone()), HACKRF_ERROR_BUSY);
        assert_eq!(dev.stop_rx(), 0);
        assert_eq!(cb.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_stop_keeps_streaming_until_close() {
        let sim = SimLibrary::with_config(SimConfig::default().with_transfer_size(64));
        let mut dev = open(&sim);
        let cb = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            stop_after: usize::MAX,
        });
        assert_eq!(dev.start_rx(cb.clone()), 0);
        sim.fail_next(SimOp::StopRx, -1000);
        assert_eq!(dev.stop_rx(), -1000);

        // Still called back after the failed stop.
        let seen = cb.calls.load(Ordering::SeqCst);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cb.calls.load(Ordering::SeqCst) == seen {
            assert!(std::time::Instant::now() < deadline, "stream stopped early");
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(dev.close(), 0);
        let after_close = cb.calls.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(cb.calls.load(Ordering::SeqCst), after_close);
        assert_eq!(Arc::strong_count(&cb), 1);
    }

    #[test]
    fn test_fault_is_one_shot() {
        let sim = SimLibrary::new();
        let mut dev = open(&sim);
        sim.fail_next(SimOp::SetLnaGain, -2);
        assert_eq!(dev.set_lna_gain(8), -2);
        assert_eq!(sim.record().settings.lna_gain, 0);
        assert_eq!(dev.set_lna_gain(8), 0);
        assert_eq!(sim.record().settings.lna_gain, 8);
        assert_eq!(sim.record().count(SimOp::SetLnaGain), 2);
    }

    #[test]
    fn test_sweep_requires_init() {
        let sim = SimLibrary::new();
        let mut dev = open(&sim);
        let cb = Arc::new(Counting {
            calls: AtomicUsize::new(0),
            stop_after: 1,
        });
        assert_eq!(dev.start_rx_sweep(cb), HACKRF_ERROR_INVALID_PARAM);
    }

    #[test]
    fn test_open_bad_index() {
        let sim = SimLibrary::new();
        assert_eq!(sim.open(1).err(), Some(HACKRF_ERROR_NOT_FOUND));
        assert_eq!(sim.record().open_devices, 0);
    }

    #[test]
    fn test_sweep_transfer_layout() {
        let request = SweepRequest {
            frequencies_mhz: vec![100, 104, 200, 202],
            bytes_per_step: 16_384,
            step_width: 1_000_000,
            step_offset: 500_000,
            interleaved: false,
        };
        let tunings = tuning_frequencies(&request);
        assert_eq!(
            tunings,
            vec![100_000_000, 101_000_000, 102_000_000, 103_000_000, 200_000_000, 201_000_000]
        );

        let mut buffer = vec![0u8; 16 * 32];
        let (mut step, mut counter) = (0, 0u8);
        fill_sweep_transfer(&mut buffer, &tunings, &mut step, &mut counter);
        assert_eq!(step, 16);
        let frame = demux(&buffer).unwrap();
        assert_eq!(frame.len(), tunings.len());
        assert!(frame.values().all(|p| p.len() == 21));
    }
}
