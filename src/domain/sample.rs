use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Sentinel emitted by the estimators when a reading could not be computed.
pub const INVALID_READING: i32 = -999;

/// One fused reading produced per decoded ECG sample.
///
/// Created by the acquisition scheduler and moved through the sample queue;
/// the consumer owns it exclusively once dequeued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSample {
    pub ecg: i32,
    /// Raw bio-impedance (respiration) value.
    pub bioz: i32,
    pub ppg_ir: i32,
    pub ppg_red: i32,
    /// Heart rate derived from the ECG R-R detector, bpm.
    pub heart_rate: u16,
    /// Last R-R interval, milliseconds.
    pub rr_interval: u16,
    pub ecg_lead_off: bool,
    pub bioz_lead_off: bool,
}

/// Selects which front-end's heart rate is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HrSource {
    /// R-R interval detection on the ECG channel
    #[default]
    Ecg,
    /// Peak spacing of the PPG waveform
    Ppg,
}

impl HrSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HrSource::Ecg => "ecg",
            HrSource::Ppg => "ppg",
        }
    }
}

impl std::fmt::Display for HrSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hr_source_serde_lowercase() {
        let json = serde_json::to_string(&HrSource::Ppg).unwrap();
        assert_eq!(json, "\"ppg\"");
        let parsed: HrSource = serde_json::from_str("\"ecg\"").unwrap();
        assert_eq!(parsed, HrSource::Ecg);
    }

    #[test]
    fn test_default_sample_is_zeroed() {
        let sample = SensorSample::default();
        assert_eq!(sample.ecg, 0);
        assert!(!sample.ecg_lead_off);
        assert_eq!(HrSource::default(), HrSource::Ecg);
    }
}
