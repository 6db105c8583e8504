// Copyright 2025-2026 CEMAXECUTER LLC

//! The native driver contract the streaming core is written against.
//!
//! Every operation returns the raw libhackrf status code; translation into
//! [`crate::Error`] and the shutdown policy for unexpected codes live in the
//! device session, not in the backends.

use std::sync::Arc;

/// Callback return value asking the driver to keep streaming.
pub const CONTINUE: i32 = 0;
/// Callback return value asking the driver to stop streaming.
pub const STOP: i32 = 1;

/// Size of one USB transfer as delivered by libhackrf.
pub const TRANSFER_BUFFER_SIZE: usize = 262_144;

const STATUS_SUCCESS: i32 = 0;
const STATUS_STREAMING_EXIT_CALLED: i32 = -1004;

/// True when a stop call's status confirms the driver will not call back
/// again. After any other status the callback registration must stay alive
/// until the device is closed.
pub fn stream_stopped(status: i32) -> bool {
    status == STATUS_SUCCESS || status == STATUS_STREAMING_EXIT_CALLED
}

/// One transfer handed to a stream callback.
///
/// For receive streams `valid_length` bytes of `buffer` hold samples. For
/// transmit streams the callback fills `buffer` and records how many bytes it
/// wrote with [`Transfer::set_valid_length`].
pub struct Transfer<'a> {
    buffer: &'a mut [u8],
    valid_length: usize,
}

impl<'a> Transfer<'a> {
    pub fn new(buffer: &'a mut [u8], valid_length: usize) -> Self {
        let valid_length = valid_length.min(buffer.len());
        Self {
            buffer,
            valid_length,
        }
    }

    pub fn buffer_length(&self) -> usize {
        self.buffer.len()
    }

    pub fn valid_length(&self) -> usize {
        self.valid_length
    }

    /// The bytes the driver marked valid.
    pub fn valid(&self) -> &[u8] {
        &self.buffer[..self.valid_length]
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    pub fn set_valid_length(&mut self, len: usize) {
        self.valid_length = len.min(self.buffer.len());
    }
}

/// Invoked by the driver on its own streaming thread, once per transfer.
///
/// Implementations must not block: they return [`CONTINUE`] or [`STOP`]
/// synchronously.
pub trait TransferCallback: Send + Sync {
    fn on_transfer(&self, transfer: &mut Transfer<'_>) -> i32;
}

/// Board part id and serial number words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartIdSerialNo {
    pub part_id: [u32; 2],
    pub serial_no: [u32; 4],
}

/// Sweep configuration in the units libhackrf expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepRequest {
    /// Flattened band edge pairs in MHz.
    pub frequencies_mhz: Vec<u16>,
    pub bytes_per_step: u32,
    pub step_width: u32,
    pub step_offset: u32,
    pub interleaved: bool,
}

impl SweepRequest {
    pub fn num_ranges(&self) -> usize {
        self.frequencies_mhz.len() / 2
    }
}

/// Library-level operations: initialization, enumeration and opening.
pub trait Library: Send + Sync {
    fn init(&self) -> i32;

    /// Serial numbers of the attached devices, in index order.
    fn device_list(&self) -> Vec<String>;

    fn open(&self, index: usize) -> Result<Box<dyn Device>, i32>;
}

/// An open device handle.
///
/// Streams hold on to the callback they were started with until the matching
/// stop call (or `close`) returns.
pub trait Device: Send {
    fn close(&mut self) -> i32;

    fn set_freq(&mut self, freq_hz: u64) -> i32;
    fn set_sample_rate(&mut self, rate_hz: f64) -> i32;
    fn set_baseband_filter_bandwidth(&mut self, bandwidth_hz: u32) -> i32;
    fn set_lna_gain(&mut self, value: u32) -> i32;
    fn set_vga_gain(&mut self, value: u32) -> i32;
    fn set_txvga_gain(&mut self, value: u32) -> i32;
    fn set_amp_enable(&mut self, enable: bool) -> i32;
    fn set_antenna_enable(&mut self, enable: bool) -> i32;

    fn start_rx(&mut self, callback: Arc<dyn TransferCallback>) -> i32;
    fn stop_rx(&mut self) -> i32;
    fn start_tx(&mut self, callback: Arc<dyn TransferCallback>) -> i32;
    fn stop_tx(&mut self) -> i32;

    fn init_sweep(&mut self, request: &SweepRequest) -> i32;
    fn start_rx_sweep(&mut self, callback: Arc<dyn TransferCallback>) -> i32;

    fn board_partid_serialno_read(&mut self, out: &mut PartIdSerialNo) -> i32;
}
