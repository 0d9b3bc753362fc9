use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[cfg(test)]
use mockall::automock;

/// Watchdog the housekeeping loop must feed about once a second.
#[cfg_attr(test, automock)]
pub trait HardwareWatchdog: Send + Sync {
    fn feed(&self);
}

impl<T: HardwareWatchdog + ?Sized> HardwareWatchdog for Arc<T> {
    fn feed(&self) {
        (**self).feed();
    }
}

/// Host replacement for the hardware watchdog. It cannot reset anything,
/// so expiry is logged once and flagged until the next feed.
#[derive(Debug)]
pub struct SoftwareWatchdog {
    timeout: Duration,
    last_feed: Mutex<Instant>,
    feeds: AtomicU64,
    expired: AtomicBool,
}

impl SoftwareWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_feed: Mutex::new(Instant::now()),
            feeds: AtomicU64::new(0),
            expired: AtomicBool::new(false),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn feeds(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Relaxed)
    }

    /// Returns true while the watchdog is starved.
    pub fn check(&self, now: Instant) -> bool {
        let starved_for = now.saturating_duration_since(*self.last_feed.lock());
        if starved_for <= self.timeout {
            return false;
        }
        if !self.expired.swap(true, Ordering::Relaxed) {
            error!(
                starved_ms = starved_for.as_millis() as u64,
                timeout_ms = self.timeout.as_millis() as u64,
                "Watchdog expired: housekeeping loop stopped feeding"
            );
        }
        true
    }

    pub async fn monitor(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.check(Instant::now());
                }
            }
        }
        debug!(feeds = self.feeds(), "Watchdog monitor stopped");
    }
}

impl HardwareWatchdog for SoftwareWatchdog {
    fn feed(&self) {
        *self.last_feed.lock() = Instant::now();
        self.feeds.fetch_add(1, Ordering::Relaxed);
        if self.expired.swap(false, Ordering::Relaxed) {
            info!("Watchdog fed again after expiry");
        }
    }
}
