use super::metrics::QueueMetrics;
use crate::domain::SensorSample;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid queue capacity: {0}")]
    InvalidCapacity(usize),
    #[error("Queue is closed")]
    Closed,
}

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum EnqueueOutcome {
    Enqueued,
    /// The queue was full; the item offered was discarded.
    Dropped,
}

/// Largest queue accepted; far beyond any realistic sample backlog.
const MAX_CAPACITY: usize = 1_000_000;

#[derive(Debug)]
struct QueueCounters {
    capacity: usize,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
}

impl QueueCounters {
    fn snapshot(&self) -> QueueMetrics {
        let pushed = self.pushed.load(Ordering::Relaxed);
        let popped = self.popped.load(Ordering::Relaxed);
        QueueMetrics {
            capacity: self.capacity,
            len: pushed.saturating_sub(popped) as usize,
            pushed,
            popped,
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Single-producer, single-consumer bounded FIFO with drop-newest overflow.
///
/// Neither half is `Clone`; the producer never blocks.
pub fn bounded<T>(capacity: usize) -> Result<(QueueProducer<T>, QueueConsumer<T>), QueueError> {
    if capacity == 0 || capacity > MAX_CAPACITY {
        return Err(QueueError::InvalidCapacity(capacity));
    }

    let (tx, rx) = mpsc::channel(capacity);
    let counters = Arc::new(QueueCounters {
        capacity,
        pushed: AtomicU64::new(0),
        popped: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
    });

    Ok((
        QueueProducer {
            tx,
            counters: counters.clone(),
        },
        QueueConsumer { rx, counters },
    ))
}

pub type SampleProducer = QueueProducer<SensorSample>;
pub type SampleConsumer = QueueConsumer<SensorSample>;

#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: mpsc::Sender<T>,
    counters: Arc<QueueCounters>,
}

impl<T> QueueProducer<T> {
    pub fn enqueue(&self, item: T) -> Result<EnqueueOutcome, QueueError> {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.counters.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(EnqueueOutcome::Enqueued)
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(EnqueueOutcome::Dropped)
            }
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.counters.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: mpsc::Receiver<T>,
    counters: Arc<QueueCounters>,
}

impl<T> QueueConsumer<T> {
    pub fn try_dequeue(&mut self) -> Result<Option<T>, QueueError> {
        match self.rx.try_recv() {
            Ok(item) => {
                self.counters.popped.fetch_add(1, Ordering::Relaxed);
                Ok(Some(item))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(QueueError::Closed),
        }
    }

    /// Waits until an item is available. `None` once the producer is gone
    /// and the queue is empty.
    pub async fn recv(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.counters.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Iterates over everything currently queued without waiting.
    pub fn drain_ready(&mut self) -> DrainReady<'_, T> {
        DrainReady { consumer: self }
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.counters.snapshot()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub struct DrainReady<'a, T> {
    consumer: &'a mut QueueConsumer<T>,
}

impl<T> Iterator for DrainReady<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.consumer.try_dequeue().ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert_eq!(
            bounded::<u32>(0).err(),
            Some(QueueError::InvalidCapacity(0))
        );
    }

    #[test]
    fn test_fifo_within_capacity() {
        let (tx, mut rx) = bounded(8).unwrap();
        for i in 0..8u32 {
            assert_eq!(tx.enqueue(i).unwrap(), EnqueueOutcome::Enqueued);
        }
        let drained: Vec<u32> = rx.drain_ready().collect();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_overflow_drops_newest() {
        let (tx, mut rx) = bounded(3).unwrap();
        for i in 0..3u32 {
            let _ = tx.enqueue(i).unwrap();
        }
        assert_eq!(tx.enqueue(99).unwrap(), EnqueueOutcome::Dropped);
        assert_eq!(tx.enqueue(100).unwrap(), EnqueueOutcome::Dropped);

        let metrics = tx.metrics();
        assert_eq!(metrics.dropped, 2);
        assert_eq!(metrics.pushed, 3);

        let drained: Vec<u32> = rx.drain_ready().collect();
        assert_eq!(drained, vec![0, 1, 2]);
    }

    #[test]
    fn test_enqueue_after_consumer_dropped() {
        let (tx, rx) = bounded::<u32>(2).unwrap();
        drop(rx);
        assert_eq!(tx.enqueue(1), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_producer_gone() {
        let (tx, mut rx) = bounded(2).unwrap();
        let _ = tx.enqueue(5u32).unwrap();
        drop(tx);
        assert_eq!(rx.recv().await, Some(5));
        assert_eq!(rx.recv().await, None);
        assert_eq!(rx.metrics().popped, 1);
    }
}
