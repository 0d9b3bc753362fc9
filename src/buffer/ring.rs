//! Bounded byte ring for host-facing serial egress.
//!
//! Packets go in whole or not at all so the framing seen by the host is
//! never torn. The drain side records when it last made progress, which the
//! stall watchdog compares against its timeout.

use super::metrics::RingMetrics;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum WriteOutcome {
    Written,
    /// Not enough free space for the whole packet; nothing was written.
    Dropped,
}

#[derive(Debug)]
struct RingState {
    bytes: VecDeque<u8>,
    /// Set while bytes are pending; refreshed whenever the drain makes progress.
    pending_since: Option<Instant>,
}

#[derive(Debug)]
pub struct StreamRingBuffer {
    capacity: usize,
    state: Mutex<RingState>,
    readable: Notify,
    packets_written: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_drained: AtomicU64,
    forced_restarts: AtomicU64,
}

impl StreamRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(RingState {
                bytes: VecDeque::with_capacity(capacity),
                pending_since: None,
            }),
            readable: Notify::new(),
            packets_written: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            bytes_drained: AtomicU64::new(0),
            forced_restarts: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn write_packet(&self, packet: &[u8]) -> WriteOutcome {
        {
            let mut state = self.state.lock();
            if self.capacity - state.bytes.len() < packet.len() {
                drop(state);
                self.packets_dropped.fetch_add(1, Ordering::Relaxed);
                return WriteOutcome::Dropped;
            }
            if state.bytes.is_empty() {
                state.pending_since = Some(Instant::now());
            }
            state.bytes.extend(packet.iter().copied());
        }

        self.packets_written.fetch_add(1, Ordering::Relaxed);
        self.readable.notify_one();
        WriteOutcome::Written
    }

    /// Removes up to `max` bytes from the front of the ring.
    pub fn drain(&self, max: usize) -> Bytes {
        let mut state = self.state.lock();
        let take = max.min(state.bytes.len());
        if take == 0 {
            return Bytes::new();
        }

        let mut out = BytesMut::with_capacity(take);
        out.extend(state.bytes.drain(..take));
        state.pending_since = (!state.bytes.is_empty()).then(Instant::now);
        drop(state);

        self.bytes_drained.fetch_add(take as u64, Ordering::Relaxed);
        out.freeze()
    }

    /// Waits until a packet has been written since the last wake-up.
    pub async fn readable(&self) {
        self.readable.notified().await;
    }

    /// Wakes the drain path regardless of new writes.
    pub fn kick(&self) {
        self.forced_restarts.fetch_add(1, Ordering::Relaxed);
        self.readable.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.state.lock().bytes.len()
    }

    /// Bytes have been waiting longer than `timeout` without any drain progress.
    pub fn is_stalled(&self, now: Instant, timeout: Duration) -> bool {
        self.state
            .lock()
            .pending_since
            .is_some_and(|since| now.saturating_duration_since(since) > timeout)
    }

    pub fn metrics(&self) -> RingMetrics {
        RingMetrics {
            capacity: self.capacity,
            pending: self.pending(),
            packets_written: self.packets_written.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            bytes_drained: self.bytes_drained.load(Ordering::Relaxed),
            forced_restarts: self.forced_restarts.load(Ordering::Relaxed),
        }
    }
}
