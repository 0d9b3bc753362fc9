use std::sync::atomic::{AtomicU64, Ordering};

/// Occurrence counter that only lets the first few and then every Nth
/// occurrence through to the log.
#[derive(Debug)]
pub struct RateLimitedLog {
    count: AtomicU64,
    burst: u64,
    every: u64,
}

impl RateLimitedLog {
    pub fn new(burst: u64, every: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            burst,
            every: every.max(1),
        }
    }

    /// Counts one occurrence; returns the running total when it should be logged.
    pub fn record(&self) -> Option<u64> {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        (count <= self.burst || count % self.every == 0).then_some(count)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for RateLimitedLog {
    fn default() -> Self {
        Self::new(3, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_three_then_every_hundredth() {
        let log = RateLimitedLog::default();
        let logged: Vec<u64> = (0..250).filter_map(|_| log.record()).collect();
        assert_eq!(logged, vec![1, 2, 3, 100, 200]);
        assert_eq!(log.count(), 250);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let log = RateLimitedLog::new(0, 0);
        assert_eq!(log.record(), Some(1));
    }
}
