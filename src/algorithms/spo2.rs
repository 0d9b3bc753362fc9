//! SpO2 and heart-rate estimation from a window of red/IR PPG samples.
//!
//! Valleys of the IR waveform are located by inverting it and running the
//! peak finder. Heart rate comes from the mean valley spacing; SpO2 from the
//! median red/IR AC-over-DC ratio of the beats between valleys, mapped through
//! an empirical calibration table.

use super::peaks::{MAX_PEAKS, PeakSet, find_peaks};
use super::quality::{
    ChannelLevels, MIN_VALID_CONFIDENCE, MIN_VALID_PERFUSION, QualityMetrics, confidence,
    probe_off_reason,
};
use crate::domain::INVALID_READING;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// SpO2 percent indexed by `red/IR ratio * 100`.
pub const SPO2_TABLE: [u8; 184] = [
    95, 95, 95, 96, 96, 96, 97, 97, 97, 97, 97, 98, 98, 98, 98, 98, 99, 99, 99, 99, //
    99, 99, 99, 99, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100, 100,
    100, 100, 100, 100, 99, 99, 99, 99, 99, 99, 99, 99, 98, 98, 98, 98, 98, 98, 97, 97, //
    97, 97, 96, 96, 96, 96, 95, 95, 95, 94, 94, 94, 93, 93, 93, 92, 92, 92, 91, 91, //
    90, 90, 89, 89, 89, 88, 88, 87, 87, 86, 86, 85, 85, 84, 84, 83, 82, 82, 81, 81, //
    80, 80, 79, 78, 78, 77, 76, 76, 75, 74, 74, 73, 72, 72, 71, 70, 69, 69, 68, 67, //
    66, 66, 65, 64, 63, 62, 62, 61, 60, 59, 58, 57, 56, 56, 55, 54, 53, 52, 51, 50, //
    49, 48, 47, 46, 45, 44, 43, 42, 41, 40, 39, 38, 37, 36, 35, 34, 33, 31, 30, 29, //
    28, 27, 26, 25, 23, 22, 21, 20, 19, 17, 16, 15, 14, 12, 11, 10, 9, 7, 6, 5, //
    3, 2, 1, 0,
];

const MOVING_AVERAGE: usize = 4;
const THRESHOLD_MIN: i32 = 30;
const THRESHOLD_MAX: i32 = 60;
/// Beats shorter than this many samples are skipped for the ratio.
const MIN_BEAT_SPAN: usize = 3;
const MAX_RATIOS: usize = 5;

/// Empirical correction applied to the raw peak-spacing heart rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrCalibration {
    pub numerator: i32,
    pub denominator: i32,
}

impl HrCalibration {
    pub const IDENTITY: Self = Self {
        numerator: 1,
        denominator: 1,
    };

    pub fn apply(&self, raw: i32) -> i32 {
        if self.denominator == 0 {
            return raw;
        }
        raw * self.numerator / self.denominator
    }
}

impl Default for HrCalibration {
    /// Raw valley spacing over-counts by 1.8.
    fn default() -> Self {
        Self {
            numerator: 10,
            denominator: 18,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub sampling_rate: usize,
    pub window_seconds: usize,
    pub min_peak_distance: usize,
    pub hr_calibration: HrCalibration,
}

impl EstimatorConfig {
    pub fn window_len(&self) -> usize {
        self.sampling_rate * self.window_seconds
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 128,
            window_seconds: 4,
            min_peak_distance: 4,
            hr_calibration: HrCalibration::default(),
        }
    }
}

/// Paired IR/red sample windows.
///
/// Holds exactly `len` samples whenever [`Spo2Window::is_ready`] is true.
/// After each estimation [`Spo2Window::shift`] drops the oldest `step`
/// samples, and the window is ready again once they have been refilled.
#[derive(Debug, Clone)]
pub struct Spo2Window {
    ir: Vec<i32>,
    red: Vec<i32>,
    len: usize,
    step: usize,
}

impl Spo2Window {
    pub fn new(len: usize, step: usize) -> Self {
        Self {
            ir: Vec::with_capacity(len),
            red: Vec::with_capacity(len),
            len,
            step: step.clamp(1, len.max(1)),
        }
    }

    pub fn for_config(config: &EstimatorConfig) -> Self {
        Self::new(config.window_len(), config.sampling_rate)
    }

    /// Appends one sample pair; returns true once the window is full.
    pub fn push(&mut self, ir: i32, red: i32) -> bool {
        if self.ir.len() < self.len {
            self.ir.push(ir);
            self.red.push(red);
        }
        self.is_ready()
    }

    pub fn is_ready(&self) -> bool {
        self.ir.len() == self.len
    }

    pub fn ir(&self) -> &[i32] {
        &self.ir
    }

    pub fn red(&self) -> &[i32] {
        &self.red
    }

    pub fn shift(&mut self) {
        let step = self.step.min(self.ir.len());
        self.ir.drain(..step);
        self.red.drain(..step);
    }

    pub fn clear(&mut self) {
        self.ir.clear();
        self.red.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Spo2Estimate {
    /// Percent, or [`INVALID_READING`].
    pub spo2: i32,
    pub spo2_valid: bool,
    /// Beats per minute, or [`INVALID_READING`].
    pub heart_rate: i32,
    pub hr_valid: bool,
    /// Median red/IR ratio times 100 when at least one beat yielded one.
    pub ratio: Option<i32>,
    #[serde(skip)]
    pub valleys: PeakSet,
    pub quality: QualityMetrics,
}

/// Maps a ratio (times 100) through the calibration table; the bounds are exclusive.
pub fn spo2_from_ratio(ratio: i32) -> Option<i32> {
    if ratio > 2 && ratio < SPO2_TABLE.len() as i32 {
        Some(i32::from(SPO2_TABLE[ratio as usize]))
    } else {
        None
    }
}

/// Peak-ratio estimator. The scratch buffer is reused across calls and
/// carries no state from one window to the next.
#[derive(Debug, Clone)]
pub struct Spo2Estimator {
    config: EstimatorConfig,
    scratch: Vec<i32>,
}

impl Spo2Estimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let scratch = Vec::with_capacity(config.window_len());
        Self { config, scratch }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn estimate(&mut self, ir: &[i32], red: &[i32]) -> Spo2Estimate {
        let n = ir.len().min(red.len());
        let (ir, red) = (&ir[..n], &red[..n]);

        let valleys = self.find_valleys(ir);

        let (heart_rate, hr_valid) = match valleys.mean_interval() {
            Some(interval) if interval > 0 => {
                let raw = (self.config.sampling_rate * 60 / interval) as i32;
                (self.config.hr_calibration.apply(raw), true)
            }
            _ => (INVALID_READING, false),
        };

        let ratio = median_ratio(ir, red, &valleys);
        let (spo2, spo2_valid) = match ratio.and_then(spo2_from_ratio) {
            Some(spo2) => (spo2, true),
            None => (INVALID_READING, false),
        };

        let ir_levels = ChannelLevels::measure(ir);
        let red_levels = ChannelLevels::measure(red);
        let perfusion_ir = ir_levels.perfusion();
        let confidence = confidence(perfusion_ir, ir_levels.ac, valleys.len());

        let quality = QualityMetrics {
            perfusion_ir,
            perfusion_red: red_levels.perfusion(),
            signal_strength: ir_levels.ac as i32,
            confidence,
            valid: spo2_valid
                && hr_valid
                && confidence >= MIN_VALID_CONFIDENCE
                && perfusion_ir >= MIN_VALID_PERFUSION,
            peak_count: valleys.len(),
            probe_off: probe_off_reason(ir_levels, red_levels, perfusion_ir, valleys.len()),
        };

        trace!(
            heart_rate,
            spo2,
            ?ratio,
            valleys = valleys.len(),
            confidence,
            perfusion_ir,
            "SpO2 window estimated"
        );

        Spo2Estimate {
            spo2,
            spo2_valid,
            heart_rate,
            hr_valid,
            ratio,
            valleys,
            quality,
        }
    }

    /// Inverts the DC-removed IR channel so valleys become peaks, applies a
    /// 4-point moving average, and runs the peak finder with an adaptive threshold.
    fn find_valleys(&mut self, ir: &[i32]) -> PeakSet {
        let n = ir.len();
        if n == 0 {
            return PeakSet::new();
        }

        let mean = ir.iter().map(|&s| i64::from(s)).sum::<i64>() / n as i64;
        let x = &mut self.scratch;
        x.clear();
        x.extend(ir.iter().map(|&s| (mean - i64::from(s)) as i32));

        // The last few samples average over what remains so the tail has no step.
        for k in 0..n {
            let tail = &x[k..(k + MOVING_AVERAGE).min(n)];
            let sum: i64 = tail.iter().map(|&v| i64::from(v)).sum();
            x[k] = (sum / tail.len() as i64) as i32;
        }

        let threshold = (x.iter().map(|&v| i64::from(v)).sum::<i64>() / n as i64) as i32;
        let threshold = threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX);

        find_peaks(x, threshold, self.config.min_peak_distance, MAX_PEAKS)
    }
}

/// Red/IR ratio for every beat between consecutive valleys, median of up to five.
fn median_ratio(ir: &[i32], red: &[i32], valleys: &PeakSet) -> Option<i32> {
    let mut ratios: Vec<i64> = Vec::with_capacity(MAX_RATIOS);

    for (v1, v2) in valleys.pairs() {
        if v2 - v1 <= MIN_BEAT_SPAN || v2 >= ir.len() {
            continue;
        }
        if ratios.len() >= MAX_RATIOS {
            break;
        }

        let (ir_max_idx, ir_dc_max) = channel_max(ir, v1, v2);
        let (red_max_idx, red_dc_max) = channel_max(red, v1, v2);

        let ir_ac = ac_above_baseline(ir, v1, v2, ir_max_idx);
        let red_ac = ac_above_baseline(red, v1, v2, red_max_idx);

        let numerator = (red_ac * ir_dc_max) >> 7;
        let denominator = (ir_ac * red_dc_max) >> 7;

        if denominator > 0 && numerator != 0 {
            ratios.push(numerator * 100 / denominator);
        }
    }

    if ratios.is_empty() {
        return None;
    }

    ratios.sort_unstable();
    let mid = ratios.len() / 2;
    let median = if mid > 1 {
        (ratios[mid - 1] + ratios[mid]) / 2
    } else {
        ratios[mid]
    };
    Some(median.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
}

/// First maximum of `samples[from..to]` and its index.
fn channel_max(samples: &[i32], from: usize, to: usize) -> (usize, i64) {
    let mut best = (from, i64::from(samples[from]));
    for (i, &s) in samples.iter().enumerate().take(to).skip(from) {
        if i64::from(s) > best.1 {
            best = (i, i64::from(s));
        }
    }
    best
}

/// Peak height above the straight line joining the two valleys.
fn ac_above_baseline(samples: &[i32], v1: usize, v2: usize, peak: usize) -> i64 {
    let (y1, y2) = (i64::from(samples[v1]), i64::from(samples[v2]));
    let baseline = y1 + (y2 - y1) * (peak - v1) as i64 / (v2 - v1) as i64;
    i64::from(samples[peak]) - baseline
}
