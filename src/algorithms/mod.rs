//! Signal-processing algorithms run by the consumer task. Nothing in here
//! performs I/O or touches shared state.

pub mod peaks;
pub mod probe;
pub mod quality;
pub mod respiration;
pub mod spo2;
pub mod stats;

pub use peaks::{MAX_PEAKS, PeakSet, find_peaks};
pub use probe::{ProbeState, ProbeTransition};
pub use quality::{ProbeOffReason, QualityMetrics};
pub use respiration::{
    BreathIntervalHistory, RespirationConfig, RespirationDetector, RespirationReset,
};
pub use spo2::{
    EstimatorConfig, HrCalibration, SPO2_TABLE, Spo2Estimate, Spo2Estimator, Spo2Window,
    spo2_from_ratio,
};
pub use stats::{RollingStats, StatsSummary, Trend, VitalStats};
