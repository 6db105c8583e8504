// Copyright 2025-2026 CEMAXECUTER LLC

//! Transmit chunker: feeds the pending byte queue to the driver.

use std::sync::Arc;

use crate::driver::{Transfer, TransferCallback, CONTINUE, STOP};
use crate::error::{Error, Result};
use crate::stream::{Shared, Sink, StopReason, StreamKind, StreamState};
use crate::{HackRf, TransceiverMode};

/// Upper bound on bytes handed to the driver per TX callback.
pub const TX_CHUNK_SIZE: usize = 1_000_000;

/// Bytes waiting to be transmitted, consumed from the front.
#[derive(Debug, Default, Clone)]
pub struct TransmitQueue {
    data: Vec<u8>,
    head: usize,
}

impl TransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        if self.head > 0 {
            self.data.drain(..self.head);
            self.head = 0;
        }
        self.data.extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }

    /// Copy up to `max` queued bytes into `out` and drop them from the queue.
    pub fn pop_into(&mut self, out: &mut [u8], max: usize) -> usize {
        let n = self.len().min(max).min(out.len());
        out[..n].copy_from_slice(&self.data[self.head..self.head + n]);
        self.head += n;
        if self.is_empty() {
            self.clear();
        }
        n
    }
}

impl From<Vec<u8>> for TransmitQueue {
    fn from(data: Vec<u8>) -> Self {
        Self { data, head: 0 }
    }
}

impl StreamState {
    pub(crate) fn on_tx(&mut self, transfer: &mut Transfer<'_>) -> i32 {
        if self.session.is_none() {
            transfer.set_valid_length(0);
            return STOP;
        }

        let n = self.tx_queue.pop_into(transfer.buffer_mut(), TX_CHUNK_SIZE);
        transfer.set_valid_length(n);
        self.sample_count += n as u64;

        if self.tx_queue.is_empty() {
            self.finish(StopReason::QueueDrained);
            STOP
        } else {
            CONTINUE
        }
    }
}

struct TxCallback {
    shared: Arc<Shared>,
}

impl TransferCallback for TxCallback {
    fn on_transfer(&self, transfer: &mut Transfer<'_>) -> i32 {
        self.shared.lock().on_tx(transfer)
    }
}

impl HackRf {
    /// Append bytes (interleaved signed 8-bit I/Q) to the transmit queue.
    pub fn queue_tx(&mut self, bytes: &[u8]) {
        self.shared.lock().tx_queue.extend_from_slice(bytes);
    }

    /// Move everything collected by the last buffering receive session to
    /// the transmit queue, for record-and-replay.
    pub fn queue_buffer_for_tx(&mut self) -> usize {
        let mut state = self.shared.lock();
        let recorded = std::mem::take(&mut state.rx_buffer);
        state.tx_queue.extend_from_slice(&recorded);
        recorded.len()
    }

    /// Bytes still waiting to be transmitted.
    pub fn tx_pending(&self) -> usize {
        self.shared.lock().tx_queue.len()
    }

    pub fn clear_tx(&mut self) {
        self.shared.lock().tx_queue.clear();
    }

    /// Start transmitting the queue. The session ends by itself once the
    /// queue is drained; an empty queue ends on the first callback.
    pub fn start_tx(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.require_idle("start transmitting")?;
        self.reap()?;

        let pending = self.tx_pending();
        let done = self.begin(TransceiverMode::Transmitting, Sink::Tx, 0);
        let callback = Arc::new(TxCallback {
            shared: self.shared.clone(),
        });
        self.launch(StreamKind::Tx, callback, done)?;
        log::info!(
            "HackRF transmit started ({} MHz, {} bytes queued, TXVGA={} dB)",
            self.center_freq() / 1_000_000,
            pending,
            self.txvga_gain()
        );
        Ok(())
    }

    pub fn stop_tx(&mut self) -> Result<()> {
        let mode = self.mode();
        if matches!(mode, TransceiverMode::Receiving | TransceiverMode::Sweeping) {
            return Err(Error::State {
                operation: "stop transmitting",
                mode,
            });
        }
        self.ensure_open()?;

        self.shared.lock().finish(StopReason::Requested);
        if self.active.is_some() {
            self.reap()
        } else {
            let code = self.device_mut()?.stop_tx();
            self.check(code)
        }
    }
}
