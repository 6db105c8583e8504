// Copyright 2025-2026 CEMAXECUTER LLC

//! Transceiver-mode state machine and receive streaming.
//!
//! Session state lives behind a mutex shared with the driver's streaming
//! thread. Callbacks only ever move the mode *to* `Off`; every transition
//! away from `Off` happens on the caller's thread.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use num_complex::Complex64;

use crate::codec::{self, BYTES_PER_SAMPLE};
use crate::driver::{self, Transfer, TransferCallback, CONTINUE, STOP};
use crate::error::{Error, Result};
use crate::sweep::SweepSink;
use crate::tx::TransmitQueue;
use crate::HackRf;

/// Operating state of the transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransceiverMode {
    Off,
    Receiving,
    Transmitting,
    Sweeping,
}

impl TransceiverMode {
    /// Firmware transceiver mode number.
    pub fn code(&self) -> u16 {
        match self {
            Self::Off => 0,
            Self::Receiving => 1,
            Self::Transmitting => 2,
            Self::Sweeping => 5,
        }
    }
}

impl fmt::Display for TransceiverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::Receiving => "receiving",
            Self::Transmitting => "transmitting",
            Self::Sweeping => "sweeping",
        })
    }
}

/// Why a session returned to `Off`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stop_rx`/`stop_tx`/`close` from the caller
    Requested,
    /// `sample_count_limit` bytes collected
    LimitReached,
    /// The sink returned `true`
    SinkRequested,
    /// The transmit queue ran dry
    QueueDrained,
    /// Forced shutdown after an unexpected driver status
    DriverError,
}

/// Receives raw RX bytes on the driver thread. Returning `true` ends the session.
pub type RxSink = Box<dyn FnMut(&[u8]) -> bool + Send>;

pub(crate) enum Sink {
    Rx(Option<RxSink>),
    Sweep(Option<SweepSink>),
    Tx,
}

/// Callback-side half of an acquisition session. Dropped when the mode
/// returns to `Off`; its completion sender goes with it.
pub(crate) struct AcquisitionSession {
    pub(crate) limit: u64,
    pub(crate) sink: Sink,
    done: Sender<StopReason>,
}

impl AcquisitionSession {
    pub(crate) fn new(limit: u64, sink: Sink, done: Sender<StopReason>) -> Self {
        Self { limit, sink, done }
    }
}

pub(crate) struct StreamState {
    pub(crate) mode: TransceiverMode,
    pub(crate) bias_tee_on: bool,
    pub(crate) session: Option<AcquisitionSession>,
    /// Bytes collected (RX, sweep payload) or emitted (TX) by the latest session
    pub(crate) sample_count: u64,
    pub(crate) rx_buffer: Vec<u8>,
    pub(crate) tx_queue: TransmitQueue,
    pub(crate) last_stop: Option<StopReason>,
}

impl StreamState {
    pub(crate) fn new() -> Self {
        Self {
            mode: TransceiverMode::Off,
            bias_tee_on: false,
            session: None,
            sample_count: 0,
            rx_buffer: Vec::new(),
            tx_queue: TransmitQueue::new(),
            last_stop: None,
        }
    }

    /// Force the mode to `Off`. The firmware drops antenna bias when idle,
    /// so the bias tee flag follows.
    pub(crate) fn finish(&mut self, reason: StopReason) {
        self.mode = TransceiverMode::Off;
        self.bias_tee_on = false;
        if let Some(session) = self.session.take() {
            self.last_stop = Some(reason);
            let _ = session.done.try_send(reason);
            log::debug!("session finished: {:?} after {} bytes", reason, self.sample_count);
        }
    }

    pub(crate) fn on_rx(&mut self, data: &[u8]) -> i32 {
        let Some(session) = self.session.as_mut() else {
            return STOP;
        };

        let mut chunk = data;
        let mut stop = None;
        if session.limit > 0 {
            let remaining = session.limit.saturating_sub(self.sample_count);
            let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
            if chunk.len() >= remaining {
                chunk = &chunk[..remaining];
                stop = Some(StopReason::LimitReached);
            }
        }
        self.sample_count += chunk.len() as u64;

        match &mut session.sink {
            Sink::Rx(Some(sink)) => {
                if sink(chunk) && stop.is_none() {
                    stop = Some(StopReason::SinkRequested);
                }
            }
            _ => self.rx_buffer.extend_from_slice(chunk),
        }

        match stop {
            Some(reason) => {
                self.finish(reason);
                STOP
            }
            None => CONTINUE,
        }
    }
}

pub(crate) struct Shared {
    state: Mutex<StreamState>,
}

impl Shared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StreamState::new()),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamKind {
    Rx,
    Tx,
    Sweep,
}

/// Caller-side half of an acquisition session: the callback registration
/// the driver points at, and the completion signal. Released only once the
/// driver's stop (or close) call has returned.
pub(crate) struct ActiveStream {
    pub(crate) kind: StreamKind,
    _registration: Arc<dyn TransferCallback>,
    done: Receiver<StopReason>,
}

struct RxCallback {
    shared: Arc<Shared>,
}

impl TransferCallback for RxCallback {
    fn on_transfer(&self, transfer: &mut Transfer<'_>) -> i32 {
        self.shared.lock().on_rx(transfer.valid())
    }
}

impl HackRf {
    /// Current transceiver mode.
    pub fn mode(&self) -> TransceiverMode {
        self.shared.lock().mode
    }

    /// Bytes collected by the current or most recent session.
    pub fn sample_count(&self) -> u64 {
        self.shared.lock().sample_count
    }

    /// RX byte limit; 0 collects until `stop_rx`.
    pub fn sample_count_limit(&self) -> u64 {
        self.sample_count_limit
    }

    pub fn set_sample_count_limit(&mut self, bytes: u64) {
        self.sample_count_limit = bytes;
    }

    pub fn last_stop_reason(&self) -> Option<StopReason> {
        self.shared.lock().last_stop
    }

    /// Bytes accumulated by a sink-less receive session.
    pub fn buffer_len(&self) -> usize {
        self.shared.lock().rx_buffer.len()
    }

    pub fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.shared.lock().rx_buffer)
    }

    /// Start receiving. Without a sink, data accumulates in the internal
    /// buffer (see [`HackRf::take_buffer`]). With a sample count limit set,
    /// the session ends on its own after that many bytes.
    ///
    /// The sink runs on the driver thread with the session lock held and
    /// must return promptly.
    pub fn start_rx(&mut self, sink: Option<RxSink>) -> Result<()> {
        self.ensure_open()?;
        self.require_idle("start receiving")?;
        self.reap()?;

        let limit = self.sample_count_limit;
        let done = self.begin(TransceiverMode::Receiving, Sink::Rx(sink), limit);
        let callback = Arc::new(RxCallback {
            shared: self.shared.clone(),
        });
        self.launch(StreamKind::Rx, callback, done)?;
        log::info!(
            "HackRF receive started ({} MHz, {} MS/s, limit={} bytes)",
            self.center_freq() / 1_000_000,
            self.sample_rate() / 1e6,
            limit
        );
        Ok(())
    }

    /// Stop a receive or sweep session.
    pub fn stop_rx(&mut self) -> Result<()> {
        let mode = self.mode();
        if mode == TransceiverMode::Transmitting {
            return Err(Error::State {
                operation: "stop receiving",
                mode,
            });
        }
        self.ensure_open()?;

        self.shared.lock().finish(StopReason::Requested);
        if self.active.is_some() {
            self.reap()
        } else {
            let code = self.device_mut()?.stop_rx();
            self.check(code)
        }
    }

    /// Block until the active session returns to `Off`.
    pub fn wait_idle(&self, timeout: Duration) -> Result<StopReason> {
        if let Some(active) = &self.active {
            match active.done.recv_timeout(timeout) {
                Ok(reason) => return Ok(reason),
                Err(RecvTimeoutError::Timeout) => return Err(Error::Timeout(timeout)),
                Err(RecvTimeoutError::Disconnected) => {}
            }
        }

        let state = self.shared.lock();
        match (state.mode, state.last_stop) {
            (TransceiverMode::Off, Some(reason)) => Ok(reason),
            (mode, _) => Err(Error::State {
                operation: "wait for idle",
                mode,
            }),
        }
    }

    /// Receive exactly `num_samples` complex samples.
    ///
    /// Sets `sample_count_limit` to two bytes per sample, runs a buffering
    /// receive session and blocks (up to the configured read timeout) until
    /// the limit is reached.
    pub fn read_samples(&mut self, num_samples: usize) -> Result<Vec<Complex64>> {
        if num_samples == 0 {
            return Ok(Vec::new());
        }

        let limit = num_samples
            .checked_mul(BYTES_PER_SAMPLE)
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or_else(|| {
                Error::parameter(
                    "num_samples",
                    format!("{} samples exceeds the byte counter range", num_samples),
                )
            })?;
        self.set_sample_count_limit(limit);
        self.start_rx(None)?;

        let timeout = self.config.read_timeout();
        let waited = self.wait_idle(timeout);
        self.stop_rx()?;
        waited?;

        let bytes = self.take_buffer();
        Ok(codec::decode(&bytes))
    }

    pub(crate) fn require_idle(&self, operation: &'static str) -> Result<()> {
        match self.mode() {
            TransceiverMode::Off => Ok(()),
            mode => Err(Error::State { operation, mode }),
        }
    }

    /// Install a fresh session and move the mode out of `Off`.
    pub(crate) fn begin(&mut self, mode: TransceiverMode, sink: Sink, limit: u64) -> Receiver<StopReason> {
        let (done_tx, done_rx) = bounded(1);
        let mut state = self.shared.lock();
        if matches!(sink, Sink::Rx(_)) {
            state.rx_buffer.clear();
        }
        state.mode = mode;
        state.sample_count = 0;
        state.last_stop = None;
        state.session = Some(AcquisitionSession::new(limit, sink, done_tx));
        log::debug!("transceiver mode {} (firmware mode {})", mode, mode.code());
        done_rx
    }

    /// Hand the callback to the driver. On failure the session is torn down
    /// by `check`.
    pub(crate) fn launch(
        &mut self,
        kind: StreamKind,
        callback: Arc<dyn TransferCallback>,
        done: Receiver<StopReason>,
    ) -> Result<()> {
        let code = {
            let device = self.device_mut()?;
            match kind {
                StreamKind::Rx => device.start_rx(callback.clone()),
                StreamKind::Tx => device.start_tx(callback.clone()),
                StreamKind::Sweep => device.start_rx_sweep(callback.clone()),
            }
        };
        self.check(code)?;
        self.active = Some(ActiveStream {
            kind,
            _registration: callback,
            done,
        });
        Ok(())
    }

    /// Stop a stream the driver still has registered, then drop the
    /// registration. Needed after a session ended from inside its callback.
    /// If the stop is not confirmed the registration is kept until the
    /// device is closed.
    pub(crate) fn reap(&mut self) -> Result<()> {
        let Some(kind) = self.active.as_ref().map(|a| a.kind) else {
            return Ok(());
        };
        let code = {
            let device = self.device_mut()?;
            match kind {
                StreamKind::Tx => device.stop_tx(),
                StreamKind::Rx | StreamKind::Sweep => device.stop_rx(),
            }
        };
        if driver::stream_stopped(code) {
            self.active = None;
        }
        self.check(code)
    }
}
