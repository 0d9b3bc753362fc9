//! Moves framed bytes from the stream ring to the host-facing sink, plus the
//! stall watchdog that re-kicks the drain path when bytes sit unsent.
//!
//! Every sink write and flush is bounded by `write_timeout`, so a host that
//! stops reading fails the pass instead of parking the drain task; the next
//! kick then starts a fresh pass.

use super::error::StreamError;
use crate::acquisition::RateLimitedLog;
use crate::buffer::StreamRingBuffer;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Largest chunk handed to the sink per write.
    pub chunk: usize,
    pub stall_timeout: Duration,
    pub check_interval: Duration,
    /// Longest a single sink write or flush may block.
    pub write_timeout: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            chunk: 512,
            stall_timeout: Duration::from_millis(500),
            check_interval: Duration::from_millis(100),
            write_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Default)]
pub struct DrainStats {
    writes: AtomicU64,
    write_errors: AtomicU64,
    write_timeouts: AtomicU64,
    bytes_written: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainSnapshot {
    pub writes: u64,
    /// Failed passes, timeouts included.
    pub write_errors: u64,
    pub write_timeouts: u64,
    pub bytes_written: u64,
}

impl DrainStats {
    pub fn snapshot(&self) -> DrainSnapshot {
        DrainSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

pub struct StreamDrain<W> {
    ring: Arc<StreamRingBuffer>,
    sink: W,
    config: DrainConfig,
    stats: Arc<DrainStats>,
    error_log: RateLimitedLog,
}

impl<W: AsyncWrite + Unpin> StreamDrain<W> {
    pub fn new(ring: Arc<StreamRingBuffer>, sink: W, config: DrainConfig) -> Self {
        Self {
            ring,
            sink,
            config: DrainConfig {
                chunk: config.chunk.max(1),
                ..config
            },
            stats: Arc::new(DrainStats::default()),
            error_log: RateLimitedLog::default(),
        }
    }

    pub fn stats(&self) -> Arc<DrainStats> {
        self.stats.clone()
    }

    /// Writes everything currently pending. Bytes taken from the ring are
    /// gone even when the sink rejects them or times out.
    pub async fn drain_pending(&mut self) -> Result<usize, StreamError> {
        let limit = self.config.write_timeout;
        let mut total = 0;
        loop {
            let chunk = self.ring.drain(self.config.chunk);
            if chunk.is_empty() {
                break;
            }
            timeout(limit, self.sink.write_all(&chunk))
                .await
                .map_err(|_| StreamError::WriteTimeout(limit))??;
            total += chunk.len();
        }
        if total > 0 {
            timeout(limit, self.sink.flush())
                .await
                .map_err(|_| StreamError::WriteTimeout(limit))??;
        }
        Ok(total)
    }

    async fn drain_and_count(&mut self) {
        match self.drain_pending().await {
            Ok(0) => {}
            Ok(written) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_written.fetch_add(written as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.write_errors.fetch_add(1, Ordering::Relaxed);
                if matches!(e, StreamError::WriteTimeout(_)) {
                    self.stats.write_timeouts.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(count) = self.error_log.record() {
                    error!(count, error = %e, "Stream sink write failed");
                }
            }
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(chunk = self.config.chunk, "Stream drain started");
        let ring = self.ring.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ring.readable() => self.drain_and_count().await,
            }
        }

        // Flush what the consumer managed to write before shutdown
        self.drain_and_count().await;
        info!(stats = ?self.stats.snapshot(), "Stream drain stopped");
    }
}

/// Kicks the drain path whenever bytes have waited longer than the stall
/// timeout. Runs beside the drain so it keeps working if the drain hangs.
pub async fn run_stall_watchdog(
    ring: Arc<StreamRingBuffer>,
    config: DrainConfig,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.check_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                if check_stall(&ring, Instant::now(), config.stall_timeout) {
                    warn!(
                        pending = ring.pending(),
                        timeout_ms = config.stall_timeout.as_millis() as u64,
                        "Stream drain stalled, forcing restart"
                    );
                }
            }
        }
    }
    debug!("Stall watchdog stopped");
}

/// Returns true when the ring was stalled and has been kicked.
pub fn check_stall(ring: &StreamRingBuffer, now: Instant, timeout: Duration) -> bool {
    if ring.is_stalled(now, timeout) {
        ring.kick();
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WriteOutcome;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct FailingSink;

    /// Accepts nothing and never wakes, like a host that stopped reading.
    struct StalledSink;

    impl AsyncWrite for StalledSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Pending
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Pending
        }
    }

    fn stalled_config() -> DrainConfig {
        DrainConfig {
            write_timeout: Duration::from_millis(50),
            ..DrainConfig::default()
        }
    }

    impl AsyncWrite for FailingSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "host gone",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_drain_pending_preserves_order() {
        let ring = Arc::new(StreamRingBuffer::new(1024));
        assert_eq!(ring.write_packet(&[1, 2, 3]), WriteOutcome::Written);
        assert_eq!(ring.write_packet(&[4, 5]), WriteOutcome::Written);

        let mut drain = StreamDrain::new(
            ring.clone(),
            Vec::new(),
            DrainConfig {
                chunk: 2,
                ..DrainConfig::default()
            },
        );
        assert_eq!(drain.drain_pending().await.unwrap(), 5);
        assert_eq!(drain.sink, vec![1, 2, 3, 4, 5]);
        assert_eq!(ring.pending(), 0);
    }

    #[tokio::test]
    async fn test_sink_error_counted() {
        let ring = Arc::new(StreamRingBuffer::new(64));
        let _ = ring.write_packet(&[9; 8]);
        let mut drain = StreamDrain::new(ring.clone(), FailingSink, DrainConfig::default());

        drain.drain_and_count().await;
        let stats = drain.stats().snapshot();
        assert_eq!(stats.write_errors, 1);
        assert_eq!(stats.writes, 0);
        assert_eq!(ring.pending(), 0);
    }

    #[tokio::test]
    async fn test_stalled_sink_times_out() {
        let ring = Arc::new(StreamRingBuffer::new(64));
        let _ = ring.write_packet(&[3; 8]);
        let mut drain = StreamDrain::new(ring.clone(), StalledSink, stalled_config());

        let started = Instant::now();
        let result = drain.drain_pending().await;
        assert!(matches!(result, Err(StreamError::WriteTimeout(_))), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(ring.pending(), 0);
    }

    #[tokio::test]
    async fn test_drain_keeps_serving_after_stalled_write() {
        let ring = Arc::new(StreamRingBuffer::new(64));
        let drain = StreamDrain::new(ring.clone(), StalledSink, stalled_config());
        let stats = drain.stats();
        let token = CancellationToken::new();
        let handle = tokio::spawn(drain.run(token.clone()));

        let _ = ring.write_packet(&[1; 4]);
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = ring.write_packet(&[2; 4]);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.write_timeouts, 2);
        assert_eq!(snapshot.write_errors, 2);
        assert_eq!(ring.pending(), 0);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("drain stops despite the stalled sink")
            .unwrap();
    }

    #[test]
    fn test_stall_kicks_ring() {
        let ring = StreamRingBuffer::new(64);
        let _ = ring.write_packet(&[1; 4]);
        let now = Instant::now();
        assert!(!check_stall(&ring, now, Duration::from_millis(500)));
        assert!(check_stall(
            &ring,
            now + Duration::from_millis(600),
            Duration::from_millis(500)
        ));
        assert_eq!(ring.metrics().forced_restarts, 1);
    }

    #[tokio::test]
    async fn test_run_flushes_on_shutdown() {
        let ring = Arc::new(StreamRingBuffer::new(64));
        let (client, mut server) = tokio::io::duplex(64);
        let drain = StreamDrain::new(ring.clone(), client, DrainConfig::default());
        let stats = drain.stats();
        let token = CancellationToken::new();
        let handle = tokio::spawn(drain.run(token.clone()));

        let _ = ring.write_packet(&[7, 7, 7]);
        let mut buf = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, [7, 7, 7]);

        token.cancel();
        handle.await.unwrap();
        assert_eq!(stats.snapshot().bytes_written, 3);
    }
}
