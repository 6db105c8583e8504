// Copyright 2025-2026 CEMAXECUTER LLC

//! libhackrf backend.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::driver::{self, Device, Library, PartIdSerialNo, SweepRequest, Transfer, TransferCallback};

const HACKRF_SUCCESS: c_int = 0;
const HACKRF_ERROR_INVALID_PARAM: c_int = -2;

const LINEAR: c_int = 0;
const INTERLEAVED: c_int = 1;

#[repr(C)]
struct HackrfDeviceList {
    serial_numbers: *mut *mut c_char,
    usb_board_ids: *mut c_int,
    usb_device_index: *mut c_int,
    devicecount: c_int,
    usb_devices: *mut *mut c_void,
    usb_devicecount: c_int,
}

#[repr(C)]
struct HackrfTransfer {
    device: *mut c_void,
    buffer: *mut u8,
    buffer_length: c_int,
    valid_length: c_int,
    rx_ctx: *mut c_void,
    tx_ctx: *mut c_void,
}

#[repr(C)]
struct ReadPartidSerialno {
    part_id: [u32; 2],
    serial_no: [u32; 4],
}

type HackrfDevice = c_void;
type SampleBlockCallback = unsafe extern "C" fn(*mut HackrfTransfer) -> c_int;

extern "C" {
    fn hackrf_init() -> c_int;
    fn hackrf_exit() -> c_int;
    fn hackrf_device_list() -> *mut HackrfDeviceList;
    fn hackrf_device_list_open(
        list: *mut HackrfDeviceList,
        idx: c_int,
        device: *mut *mut HackrfDevice,
    ) -> c_int;
    fn hackrf_device_list_free(list: *mut HackrfDeviceList);
    fn hackrf_close(device: *mut HackrfDevice) -> c_int;
    fn hackrf_set_freq(device: *mut HackrfDevice, freq_hz: u64) -> c_int;
    fn hackrf_set_sample_rate(device: *mut HackrfDevice, freq_hz: f64) -> c_int;
    fn hackrf_set_baseband_filter_bandwidth(device: *mut HackrfDevice, bandwidth_hz: u32) -> c_int;
    fn hackrf_set_lna_gain(device: *mut HackrfDevice, value: u32) -> c_int;
    fn hackrf_set_vga_gain(device: *mut HackrfDevice, value: u32) -> c_int;
    fn hackrf_set_txvga_gain(device: *mut HackrfDevice, value: u32) -> c_int;
    fn hackrf_set_amp_enable(device: *mut HackrfDevice, value: u8) -> c_int;
    fn hackrf_set_antenna_enable(device: *mut HackrfDevice, value: u8) -> c_int;
    fn hackrf_start_rx(
        device: *mut HackrfDevice,
        callback: SampleBlockCallback,
        rx_ctx: *mut c_void,
    ) -> c_int;
    fn hackrf_stop_rx(device: *mut HackrfDevice) -> c_int;
    fn hackrf_start_tx(
        device: *mut HackrfDevice,
        callback: SampleBlockCallback,
        tx_ctx: *mut c_void,
    ) -> c_int;
    fn hackrf_stop_tx(device: *mut HackrfDevice) -> c_int;
    fn hackrf_init_sweep(
        device: *mut HackrfDevice,
        frequency_list: *const u16,
        num_ranges: c_int,
        num_bytes: u32,
        step_width: u32,
        offset: u32,
        style: c_int,
    ) -> c_int;
    fn hackrf_start_rx_sweep(
        device: *mut HackrfDevice,
        callback: SampleBlockCallback,
        rx_ctx: *mut c_void,
    ) -> c_int;
    fn hackrf_board_partid_serialno_read(
        device: *mut HackrfDevice,
        read_partid_serialno: *mut ReadPartidSerialno,
    ) -> c_int;
}

/// Heap slot whose address is handed to libhackrf as the stream context.
/// It stays boxed (and therefore at a fixed address) until the stream is
/// stopped or the device closed.
struct CallbackSlot {
    callback: Arc<dyn TransferCallback>,
}

unsafe fn dispatch(transfer: *mut HackrfTransfer, ctx: *mut c_void) -> c_int {
    if transfer.is_null() || ctx.is_null() {
        return driver::STOP;
    }
    let slot = &*(ctx as *const CallbackSlot);
    let t = &mut *transfer;
    if t.buffer.is_null() || t.buffer_length <= 0 {
        return driver::STOP;
    }
    let buf = slice::from_raw_parts_mut(t.buffer, t.buffer_length as usize);
    let valid = t.valid_length.max(0) as usize;

    // A panic must not unwind into C.
    let result = catch_unwind(AssertUnwindSafe(|| {
        let mut transfer = Transfer::new(buf, valid);
        let ret = slot.callback.on_transfer(&mut transfer);
        (ret, transfer.valid_length())
    }));

    match result {
        Ok((ret, valid)) => {
            t.valid_length = valid as c_int;
            ret
        }
        Err(_) => {
            log::error!("HackRF stream callback panicked, stopping stream");
            driver::STOP
        }
    }
}

unsafe extern "C" fn rx_trampoline(transfer: *mut HackrfTransfer) -> c_int {
    if transfer.is_null() {
        return driver::STOP;
    }
    dispatch(transfer, (*transfer).rx_ctx)
}

unsafe extern "C" fn tx_trampoline(transfer: *mut HackrfTransfer) -> c_int {
    if transfer.is_null() {
        return driver::STOP;
    }
    dispatch(transfer, (*transfer).tx_ctx)
}

struct LibState {
    initialized: AtomicBool,
}

impl Drop for LibState {
    fn drop(&mut self) {
        if self.initialized.load(Ordering::SeqCst) {
            unsafe {
                hackrf_exit();
            }
        }
    }
}

/// The system libhackrf.
#[derive(Clone)]
pub struct LibHackrf {
    state: Arc<LibState>,
}

impl LibHackrf {
    pub fn new() -> Self {
        Self {
            state: Arc::new(LibState {
                initialized: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for LibHackrf {
    fn default() -> Self {
        Self::new()
    }
}

impl Library for LibHackrf {
    fn init(&self) -> i32 {
        let r = unsafe { hackrf_init() };
        if r == HACKRF_SUCCESS {
            self.state.initialized.store(true, Ordering::SeqCst);
        }
        r
    }

    fn device_list(&self) -> Vec<String> {
        unsafe {
            let list = hackrf_device_list();
            if list.is_null() {
                log::warn!("hackrf_device_list returned null");
                return Vec::new();
            }

            let count = (*list).devicecount.max(0) as usize;
            let mut serials = Vec::with_capacity(count);
            for i in 0..count {
                let serial_ptr = *(*list).serial_numbers.add(i);
                if serial_ptr.is_null() {
                    serials.push(String::new());
                    continue;
                }
                serials.push(CStr::from_ptr(serial_ptr).to_string_lossy().to_string());
            }

            hackrf_device_list_free(list);
            serials
        }
    }

    fn open(&self, index: usize) -> Result<Box<dyn Device>, i32> {
        let idx = c_int::try_from(index).map_err(|_| HACKRF_ERROR_INVALID_PARAM)?;
        unsafe {
            let list = hackrf_device_list();
            if list.is_null() {
                return Err(HACKRF_ERROR_INVALID_PARAM);
            }
            let mut dev: *mut HackrfDevice = ptr::null_mut();
            let r = hackrf_device_list_open(list, idx, &mut dev);
            hackrf_device_list_free(list);
            if r != HACKRF_SUCCESS {
                return Err(r);
            }

            Ok(Box::new(FfiDevice {
                dev,
                slot: None,
                _lib: self.state.clone(),
            }))
        }
    }
}

/// An open libhackrf device.
pub struct FfiDevice {
    dev: *mut HackrfDevice,
    slot: Option<Box<CallbackSlot>>,
    _lib: Arc<LibState>,
}

// The device pointer is only used from the owning thread; libhackrf runs its
// own transfer thread internally.
unsafe impl Send for FfiDevice {}

impl FfiDevice {
    fn start(
        &mut self,
        callback: Arc<dyn TransferCallback>,
        start: impl FnOnce(*mut HackrfDevice, *mut c_void) -> c_int,
    ) -> c_int {
        let slot = Box::new(CallbackSlot { callback });
        let ctx = &*slot as *const CallbackSlot as *mut c_void;
        let r = start(self.dev, ctx);
        if r == HACKRF_SUCCESS {
            self.slot = Some(slot);
        }
        r
    }

    /// Free the callback slot once a stop is confirmed. After a failed stop
    /// the transfer thread may still be running and holds the slot address
    /// as its context; `close` frees it after `hackrf_close` returns.
    fn release_slot(&mut self, stop_status: c_int) {
        if driver::stream_stopped(stop_status) {
            self.slot = None;
        } else if self.slot.is_some() {
            log::warn!("libhackrf stop failed ({}), keeping callback until close", stop_status);
        }
    }
}

impl Device for FfiDevice {
    fn close(&mut self) -> i32 {
        if self.dev.is_null() {
            return HACKRF_SUCCESS;
        }
        // hackrf_close stops any running stream before it returns.
        let r = unsafe { hackrf_close(self.dev) };
        self.dev = ptr::null_mut();
        self.slot = None;
        r
    }

    fn set_freq(&mut self, freq_hz: u64) -> i32 {
        unsafe { hackrf_set_freq(self.dev, freq_hz) }
    }

    fn set_sample_rate(&mut self, rate_hz: f64) -> i32 {
        unsafe { hackrf_set_sample_rate(self.dev, rate_hz) }
    }

    fn set_baseband_filter_bandwidth(&mut self, bandwidth_hz: u32) -> i32 {
        unsafe { hackrf_set_baseband_filter_bandwidth(self.dev, bandwidth_hz) }
    }

    fn set_lna_gain(&mut self, value: u32) -> i32 {
        unsafe { hackrf_set_lna_gain(self.dev, value) }
    }

    fn set_vga_gain(&mut self, value: u32) -> i32 {
        unsafe { hackrf_set_vga_gain(self.dev, value) }
    }

    fn set_txvga_gain(&mut self, value: u32) -> i32 {
        unsafe { hackrf_set_txvga_gain(self.dev, value) }
    }

    fn set_amp_enable(&mut self, enable: bool) -> i32 {
        unsafe { hackrf_set_amp_enable(self.dev, enable as u8) }
    }

    fn set_antenna_enable(&mut self, enable: bool) -> i32 {
        unsafe { hackrf_set_antenna_enable(self.dev, enable as u8) }
    }

    fn start_rx(&mut self, callback: Arc<dyn TransferCallback>) -> i32 {
        self.start(callback, |dev, ctx| unsafe { hackrf_start_rx(dev, rx_trampoline, ctx) })
    }

    fn stop_rx(&mut self) -> i32 {
        let r = unsafe { hackrf_stop_rx(self.dev) };
        self.release_slot(r);
        r
    }

    fn start_tx(&mut self, callback: Arc<dyn TransferCallback>) -> i32 {
        self.start(callback, |dev, ctx| unsafe { hackrf_start_tx(dev, tx_trampoline, ctx) })
    }

    fn stop_tx(&mut self) -> i32 {
        let r = unsafe { hackrf_stop_tx(self.dev) };
        self.release_slot(r);
        r
    }

    fn init_sweep(&mut self, request: &SweepRequest) -> i32 {
        let style = if request.interleaved { INTERLEAVED } else { LINEAR };
        unsafe {
            hackrf_init_sweep(
                self.dev,
                request.frequencies_mhz.as_ptr(),
                request.num_ranges() as c_int,
                request.bytes_per_step,
                request.step_width,
                request.step_offset,
                style,
            )
        }
    }

    fn start_rx_sweep(&mut self, callback: Arc<dyn TransferCallback>) -> i32 {
        self.start(callback, |dev, ctx| unsafe {
            hackrf_start_rx_sweep(dev, rx_trampoline, ctx)
        })
    }

    fn board_partid_serialno_read(&mut self, out: &mut PartIdSerialNo) -> i32 {
        let mut raw = ReadPartidSerialno {
            part_id: [0; 2],
            serial_no: [0; 4],
        };
        let r = unsafe { hackrf_board_partid_serialno_read(self.dev, &mut raw) };
        out.part_id = raw.part_id;
        out.serial_no = raw.serial_no;
        r
    }
}

impl Drop for FfiDevice {
    fn drop(&mut self) {
        if !self.dev.is_null() {
            self.close();
        }
    }
}
