//! Moving-average smoothing with outlier rejection for published vitals.

use parking_lot::Mutex;
use serde::Serialize;

pub const HR_SLOTS: usize = 5;
pub const HR_OUTLIER_BOUND: i32 = 30;
pub const SPO2_SLOTS: usize = 8;
pub const SPO2_OUTLIER_BOUND: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SmoothOutcome {
    Accepted(i32),
    /// Too far from the filtered value; the previous output is held.
    Rejected { held: i32 },
}

impl SmoothOutcome {
    pub fn value(self) -> i32 {
        match self {
            SmoothOutcome::Accepted(v) => v,
            SmoothOutcome::Rejected { held } => held,
        }
    }
}

/// Fixed-capacity ring whose output is the mean of its entries.
///
/// A value is added only while the ring is empty or it lies within `bound`
/// of the current output; anything further out is rejected and the output
/// held until a clear (probe off, low perfusion) restarts the ring.
#[derive(Debug, Clone)]
pub struct SmoothingRing<const N: usize> {
    values: [i32; N],
    cursor: usize,
    len: usize,
    bound: i32,
    filtered: i32,
}

impl<const N: usize> SmoothingRing<N> {
    pub fn new(bound: i32) -> Self {
        Self {
            values: [0; N],
            cursor: 0,
            len: 0,
            bound,
            filtered: 0,
        }
    }

    pub fn filtered(&self) -> Option<i32> {
        (self.len > 0).then_some(self.filtered)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, value: i32) -> SmoothOutcome {
        if self.len > 0 && (value - self.filtered).abs() > self.bound {
            return SmoothOutcome::Rejected {
                held: self.filtered,
            };
        }

        self.values[self.cursor] = value;
        self.cursor = (self.cursor + 1) % N;
        self.len = (self.len + 1).min(N);
        let sum: i64 = self.values[..self.len].iter().map(|&v| i64::from(v)).sum();
        self.filtered = (sum / self.len as i64) as i32;
        SmoothOutcome::Accepted(self.filtered)
    }

    pub fn clear(&mut self) {
        self.cursor = 0;
        self.len = 0;
        self.filtered = 0;
    }
}

/// Consecutive low-perfusion windows after which SpO2 history is discarded.
const LOW_PERFUSION_RESET: u8 = 3;
/// 0.50 % in hundredths of a percent.
const LOW_PERFUSION: u16 = 50;

#[derive(Debug, Clone)]
struct Histories {
    heart_rate: SmoothingRing<HR_SLOTS>,
    spo2: SmoothingRing<SPO2_SLOTS>,
    low_perfusion_run: u8,
}

/// HR and SpO2 smoothing state shared between the consumer and readers
/// such as the command layer.
#[derive(Debug)]
pub struct SmoothingHistory {
    inner: Mutex<Histories>,
}

impl SmoothingHistory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Histories {
                heart_rate: SmoothingRing::new(HR_OUTLIER_BOUND),
                spo2: SmoothingRing::new(SPO2_OUTLIER_BOUND),
                low_perfusion_run: 0,
            }),
        }
    }

    pub fn push_heart_rate(&self, bpm: i32) -> SmoothOutcome {
        self.inner.lock().heart_rate.push(bpm)
    }

    pub fn push_spo2(&self, percent: i32) -> SmoothOutcome {
        self.inner.lock().spo2.push(percent)
    }

    /// Tracks perfusion per estimation window; returns true when this call
    /// cleared the SpO2 history.
    pub fn observe_perfusion(&self, perfusion_ir: u16) -> bool {
        let mut inner = self.inner.lock();
        if perfusion_ir >= LOW_PERFUSION {
            inner.low_perfusion_run = 0;
            return false;
        }
        inner.low_perfusion_run = inner.low_perfusion_run.saturating_add(1);
        if inner.low_perfusion_run == LOW_PERFUSION_RESET {
            inner.spo2.clear();
            return true;
        }
        false
    }

    pub fn heart_rate(&self) -> Option<i32> {
        self.inner.lock().heart_rate.filtered()
    }

    pub fn spo2(&self) -> Option<i32> {
        self.inner.lock().spo2.filtered()
    }

    /// Drops both histories, e.g. when the probe comes off.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.heart_rate.clear();
        inner.spo2.clear();
        inner.low_perfusion_run = 0;
    }
}

impl Default for SmoothingHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_accepted_values() {
        let mut ring = SmoothingRing::<5>::new(30);
        assert_eq!(ring.filtered(), None);
        assert_eq!(ring.push(70), SmoothOutcome::Accepted(70));
        assert_eq!(ring.push(74), SmoothOutcome::Accepted(72));
        for _ in 0..10 {
            ring.push(80);
        }
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.filtered(), Some(80));
    }

    #[test]
    fn test_outlier_rejected_and_output_held() {
        let mut ring = SmoothingRing::<5>::new(HR_OUTLIER_BOUND);
        for _ in 0..3 {
            assert_eq!(ring.push(70), SmoothOutcome::Accepted(70));
        }

        assert_eq!(ring.push(110), SmoothOutcome::Rejected { held: 70 });
        assert_eq!(ring.filtered(), Some(70));
        assert_eq!(ring.len(), 3);

        // (70 + 70 + 70 + 80) / 4
        assert_eq!(ring.push(80), SmoothOutcome::Accepted(72));
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_bound_is_inclusive() {
        let mut ring = SmoothingRing::<8>::new(SPO2_OUTLIER_BOUND);
        ring.push(97);
        assert_eq!(ring.push(92), SmoothOutcome::Accepted(94));
        assert_eq!(ring.push(100), SmoothOutcome::Rejected { held: 94 });
    }

    #[test]
    fn test_sustained_outliers_never_enter_ring() {
        let mut ring = SmoothingRing::<5>::new(HR_OUTLIER_BOUND);
        ring.push(70);
        for _ in 0..(2 * HR_SLOTS) {
            assert_eq!(ring.push(200), SmoothOutcome::Rejected { held: 70 });
        }
        assert_eq!(ring.len(), 1);

        ring.clear();
        assert_eq!(ring.push(200), SmoothOutcome::Accepted(200));
    }

    #[test]
    fn test_low_perfusion_clears_spo2_after_three_windows() {
        let history = SmoothingHistory::new();
        history.push_spo2(97);
        history.push_heart_rate(70);

        assert!(!history.observe_perfusion(20));
        assert!(!history.observe_perfusion(20));
        assert!(!history.observe_perfusion(400));
        assert!(!history.observe_perfusion(20));
        assert!(!history.observe_perfusion(20));
        assert_eq!(history.spo2(), Some(97));
        assert!(history.observe_perfusion(20));
        assert_eq!(history.spo2(), None);
        assert_eq!(history.heart_rate(), Some(70));
    }
}
