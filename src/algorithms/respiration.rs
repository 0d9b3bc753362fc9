//! Breathing-rate detection over the decimated bio-impedance signal.
//!
//! A slow exponential baseline follows electrode drift; a breath is counted
//! when the signal rises above `baseline + hysteresis` after having dipped
//! below `baseline - hysteresis`. Intervals between breaths, in detector
//! samples, feed an 8-slot history whose average sets the rate.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub const BREATH_HISTORY_SLOTS: usize = 8;
const BASELINE_SHIFT: i64 = 256;
const MIN_INTERVALS_FOR_RATE: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RespirationConfig {
    /// `rate = calibration_factor / mean_interval`; 60 × detector sample rate.
    pub calibration_factor: u32,
    /// Samples ignored after start while the baseline settles.
    pub startup_skip: u32,
    /// Samples without a breath before the rate is forced to zero. Never
    /// below `max_interval`, or the longest valid interval could not land.
    pub timeout_samples: u32,
    /// Length of the amplitude check window.
    pub quality_window: u32,
    /// Minimum raw peak-to-peak over a quality window.
    pub noise_floor: i32,
    pub hysteresis: i32,
    pub min_interval: u32,
    pub max_interval: u32,
    pub min_rate: u8,
    pub max_rate: u8,
}

impl RespirationConfig {
    /// Defaults for a detector fed at `detector_rate_hz`; windows and
    /// timeouts keep their durations in seconds.
    pub fn for_rate(detector_rate_hz: u32) -> Self {
        let defaults = Self::default();
        Self {
            calibration_factor: 60 * detector_rate_hz,
            startup_skip: 10 * detector_rate_hz,
            timeout_samples: (10 * detector_rate_hz).max(defaults.max_interval),
            quality_window: 4 * detector_rate_hz,
            ..defaults
        }
    }
}

impl Default for RespirationConfig {
    fn default() -> Self {
        Self {
            calibration_factor: 1920,
            startup_skip: 320,
            timeout_samples: 400,
            quality_window: 128,
            noise_floor: 40,
            hysteresis: 20,
            min_interval: 30,
            max_interval: 400,
            min_rate: 8,
            max_rate: 80,
        }
    }
}

/// Fixed ring of the most recent accepted breath intervals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BreathIntervalHistory {
    slots: [u32; BREATH_HISTORY_SLOTS],
    cursor: usize,
    len: usize,
}

impl BreathIntervalHistory {
    pub fn push(&mut self, interval: u32) {
        self.slots[self.cursor] = interval;
        self.cursor = (self.cursor + 1) % BREATH_HISTORY_SLOTS;
        self.len = (self.len + 1).min(BREATH_HISTORY_SLOTS);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn average(&self) -> Option<u32> {
        if self.len == 0 {
            return None;
        }
        // Slots are filled from 0 and only wrap once full, so the first `len` are live.
        let sum: u32 = self.slots[..self.len].iter().sum();
        Some(sum / self.len as u32)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Why the reported rate was last forced to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RespirationReset {
    /// No breath for longer than the timeout.
    Timeout,
    /// Amplitude over the last quality window stayed under the noise floor.
    WeakSignal,
}

#[derive(Debug, Clone)]
pub struct RespirationDetector {
    config: RespirationConfig,
    samples_seen: u64,
    baseline: i64,
    waiting_for_low: bool,
    last_breath_at: Option<u64>,
    since_breath: u32,
    history: BreathIntervalHistory,
    window_min: i32,
    window_max: i32,
    window_fill: u32,
    rate: u8,
    last_reset: Option<RespirationReset>,
}

impl RespirationDetector {
    pub fn new(config: RespirationConfig) -> Self {
        Self {
            config,
            samples_seen: 0,
            baseline: 0,
            waiting_for_low: true,
            last_breath_at: None,
            since_breath: 0,
            history: BreathIntervalHistory::default(),
            window_min: i32::MAX,
            window_max: i32::MIN,
            window_fill: 0,
            rate: 0,
            last_reset: None,
        }
    }

    pub fn config(&self) -> &RespirationConfig {
        &self.config
    }

    /// Breaths per minute, 0 until enough intervals have been seen.
    pub fn rate(&self) -> u8 {
        self.rate
    }

    pub fn history(&self) -> &BreathIntervalHistory {
        &self.history
    }

    pub fn last_reset(&self) -> Option<RespirationReset> {
        self.last_reset
    }

    pub fn baseline(&self) -> i64 {
        self.baseline
    }

    /// Feeds one detector sample and returns the current rate.
    pub fn process(&mut self, sample: i32) -> u8 {
        let index = self.samples_seen;
        self.samples_seen += 1;
        let value = i64::from(sample);

        if index == 0 {
            self.baseline = value;
        } else {
            self.baseline += (value - self.baseline) / BASELINE_SHIFT;
        }

        if index < u64::from(self.config.startup_skip) {
            return self.rate;
        }

        self.check_quality(sample);
        self.detect_crossing(value, index);

        self.since_breath = self.since_breath.saturating_add(1);
        if self.since_breath > self.config.timeout_samples {
            self.force_zero(RespirationReset::Timeout);
        }

        self.rate
    }

    /// Returns to the power-on state, including the startup skip.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    fn check_quality(&mut self, sample: i32) {
        self.window_min = self.window_min.min(sample);
        self.window_max = self.window_max.max(sample);
        self.window_fill += 1;

        if self.window_fill < self.config.quality_window {
            return;
        }

        let peak_to_peak = i64::from(self.window_max) - i64::from(self.window_min);
        self.window_min = i32::MAX;
        self.window_max = i32::MIN;
        self.window_fill = 0;

        if peak_to_peak < i64::from(self.config.noise_floor) {
            self.rate = 0;
            self.history.clear();
            self.last_reset = Some(RespirationReset::WeakSignal);
        }
    }

    fn detect_crossing(&mut self, value: i64, index: u64) {
        let band = i64::from(self.config.hysteresis);

        if self.waiting_for_low {
            if value < self.baseline - band {
                self.waiting_for_low = false;
            }
            return;
        }

        if value > self.baseline + band {
            self.waiting_for_low = true;
            self.on_breath(index);
        }
    }

    fn on_breath(&mut self, index: u64) {
        self.since_breath = 0;

        let Some(previous) = self.last_breath_at else {
            self.last_breath_at = Some(index);
            return;
        };

        let interval = u32::try_from(index - previous).unwrap_or(u32::MAX);

        if interval < self.config.min_interval {
            trace!(interval, "Breath interval too short, discarded");
            return;
        }

        self.last_breath_at = Some(index);

        if interval > self.config.max_interval {
            debug!(interval, "Breath interval too long, history reset");
            self.history.clear();
            return;
        }

        self.history.push(interval);

        if self.history.len() < MIN_INTERVALS_FOR_RATE {
            return;
        }
        if let Some(average) = self.history.average().filter(|&avg| avg > 0) {
            let raw = self.config.calibration_factor / average;
            let rate = raw.clamp(
                u32::from(self.config.min_rate),
                u32::from(self.config.max_rate),
            ) as u8;
            if rate != self.rate {
                trace!(rate, average, "Respiration rate updated");
            }
            self.rate = rate;
            self.last_reset = None;
        }
    }

    fn force_zero(&mut self, reason: RespirationReset) {
        if self.rate != 0 || !self.history.is_empty() {
            debug!(?reason, "Respiration rate reset to zero");
        }
        self.rate = 0;
        self.history.clear();
        self.waiting_for_low = true;
        self.last_breath_at = None;
        self.since_breath = 0;
        self.last_reset = Some(reason);
    }
}

impl Default for RespirationDetector {
    fn default() -> Self {
        Self::new(RespirationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn breathing(interval: usize, amplitude: f64, len: usize) -> Vec<i32> {
        (0..len)
            .map(|i| (5_000.0 + amplitude * (TAU * i as f64 / interval as f64).sin()) as i32)
            .collect()
    }

    fn run(detector: &mut RespirationDetector, samples: &[i32]) -> u8 {
        samples.iter().fold(0, |_, &s| detector.process(s))
    }

    #[test]
    fn test_rate_matches_calibration_over_interval() {
        let mut detector = RespirationDetector::default();
        let rate = run(&mut detector, &breathing(60, 1_000.0, 320 + 60 * 8));
        assert!((i32::from(rate) - 32).abs() <= 1, "rate {rate}");
        assert!(detector.history().len() >= 3);
    }

    #[test]
    fn test_slow_breathing() {
        let mut detector = RespirationDetector::default();
        let rate = run(&mut detector, &breathing(100, 1_000.0, 320 + 100 * 6));
        assert!((i32::from(rate) - 19).abs() <= 1, "rate {rate}");
    }

    #[test]
    fn test_rate_is_clamped() {
        let mut detector = RespirationDetector::new(RespirationConfig {
            calibration_factor: 3_000,
            ..RespirationConfig::default()
        });
        let rate = run(&mut detector, &breathing(32, 1_000.0, 320 + 32 * 10));
        assert_eq!(rate, 80);
    }

    #[test]
    fn test_longest_interval_clamps_to_min_rate() {
        let mut detector = RespirationDetector::default();
        // 1920 / 360 = 5 breaths/min, under the floor of 8
        let rate = run(&mut detector, &breathing(360, 1_000.0, 320 + 360 * 8));
        assert_eq!(rate, 8);
        assert!(detector.history().len() >= 3);
        assert_eq!(detector.last_reset(), None);
    }

    #[test]
    fn test_needs_three_intervals() {
        let mut detector = RespirationDetector::default();
        // Skip plus two and a half cycles: at most two intervals measured
        let rate = run(&mut detector, &breathing(60, 1_000.0, 320 + 150));
        assert_eq!(rate, 0);
        assert!(detector.history().len() < 3);
    }

    #[test]
    fn test_startup_skip_ignores_early_breaths() {
        let mut detector = RespirationDetector::default();
        run(&mut detector, &breathing(60, 1_000.0, 320));
        assert!(detector.history().is_empty());
        assert_eq!(detector.rate(), 0);
    }

    #[test]
    fn test_flat_signal_resets_to_zero() {
        let mut detector = RespirationDetector::default();
        let rate = run(&mut detector, &breathing(60, 1_000.0, 320 + 60 * 8));
        assert!(rate > 0);

        // Longer than the timeout of flat input at 32 Hz
        let rate = run(&mut detector, &vec![5_000; 410]);
        assert_eq!(rate, 0);
        assert!(detector.history().is_empty());
        assert!(detector.last_reset().is_some());
    }

    #[test]
    fn test_flat_input_from_start_stays_zero() {
        let mut detector = RespirationDetector::default();
        assert_eq!(run(&mut detector, &vec![0; 1_000]), 0);
    }

    #[test]
    fn test_timeout_without_crossings() {
        let mut detector = RespirationDetector::new(RespirationConfig {
            noise_floor: 0,
            ..RespirationConfig::default()
        });
        run(&mut detector, &breathing(60, 1_000.0, 320 + 60 * 8));
        // Small wobble above the noise floor but inside the hysteresis band
        let wobble: Vec<i32> = (0..800).map(|i| 5_000 + (i % 2) * 10).collect();
        assert_eq!(run(&mut detector, &wobble), 0);
        assert_eq!(detector.last_reset(), Some(RespirationReset::Timeout));
    }

    #[test]
    fn test_history_ring_wraps() {
        let mut history = BreathIntervalHistory::default();
        assert_eq!(history.average(), None);
        for interval in 1..=10 {
            history.push(interval * 10);
        }
        assert_eq!(history.len(), BREATH_HISTORY_SLOTS);
        // Holds 30..=100
        assert_eq!(history.average(), Some(65));
    }

    #[test]
    fn test_config_for_rate() {
        let config = RespirationConfig::for_rate(32);
        assert_eq!(config, RespirationConfig::default());
        let slow = RespirationConfig::for_rate(16);
        assert_eq!(slow.calibration_factor, 960);
        assert!(slow.timeout_samples >= slow.max_interval);
        assert_eq!(RespirationConfig::for_rate(64).timeout_samples, 640);
    }

    #[test]
    fn test_reset_restarts_skip() {
        let mut detector = RespirationDetector::default();
        run(&mut detector, &breathing(60, 1_000.0, 320 + 60 * 8));
        detector.reset();
        assert_eq!(detector.rate(), 0);
        assert!(detector.history().is_empty());
    }
}
