use serde::Serialize;

/// Perfusion index scale: 10000 = 100.00 %.
pub const PERFUSION_SCALE: i64 = 10_000;
/// Perfusion is capped at 20.00 %.
pub const PERFUSION_CAP: u16 = 2_000;

/// Minimum IR perfusion (0.10 %) for an estimate to be considered valid.
pub const MIN_VALID_PERFUSION: u16 = 10;
pub const MIN_VALID_CONFIDENCE: u8 = 50;

const PROBE_OFF_MIN_DC: i64 = 1_000;
const PROBE_OFF_MAX_DC: i64 = 3_800_000;
const PROBE_OFF_MIN_PERFUSION: u16 = 30;
const PROBE_OFF_MIN_AC: i64 = 150;

/// Why a window looks like the optode is not on the skin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ProbeOffReason {
    #[default]
    None,
    /// Almost no light reaches the photodiode.
    LowDc,
    /// Ambient light or LED current drives the ADC to its rail.
    Saturated,
    LowPerfusion,
    NoPeaks,
    WeakAc,
}

impl ProbeOffReason {
    pub fn is_off(self) -> bool {
        self != ProbeOffReason::None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityMetrics {
    /// Hundredths of a percent, 0..=2000.
    pub perfusion_ir: u16,
    pub perfusion_red: u16,
    /// Half the IR peak-to-peak amplitude.
    pub signal_strength: i32,
    pub confidence: u8,
    pub valid: bool,
    pub peak_count: usize,
    pub probe_off: ProbeOffReason,
}

/// DC level and half peak-to-peak amplitude of one raw channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelLevels {
    pub dc: i64,
    pub ac: i64,
}

impl ChannelLevels {
    pub fn measure(samples: &[i32]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let sum: i64 = samples.iter().map(|&s| i64::from(s)).sum();
        let (min, max) = samples
            .iter()
            .fold((i32::MAX, i32::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));
        Self {
            dc: sum / samples.len() as i64,
            ac: (i64::from(max) - i64::from(min)) / 2,
        }
    }

    pub fn perfusion(&self) -> u16 {
        perfusion_index(self.ac, self.dc)
    }
}

pub fn perfusion_index(ac: i64, dc: i64) -> u16 {
    if dc <= 0 || ac <= 0 {
        return 0;
    }
    (ac * PERFUSION_SCALE / dc).clamp(0, i64::from(PERFUSION_CAP)) as u16
}

/// Confidence starts at 100 and loses points in bands.
pub fn confidence(perfusion_ir: u16, signal_strength: i64, peak_count: usize) -> u8 {
    let mut confidence: i32 = 100;

    confidence -= match perfusion_ir {
        0..50 => 50,
        50..100 => 30,
        100..300 => 10,
        _ => 0,
    };

    match signal_strength {
        s if s < 150 => confidence = 0,
        s if s < 300 => confidence -= 40,
        s if s < 500 => confidence -= 20,
        _ => {}
    }

    confidence -= match peak_count {
        0..3 => 40,
        3 => 20,
        4 => 10,
        _ => 0,
    };

    confidence.clamp(0, 100) as u8
}

pub fn probe_off_reason(
    ir: ChannelLevels,
    red: ChannelLevels,
    perfusion_ir: u16,
    peak_count: usize,
) -> ProbeOffReason {
    if ir.dc < PROBE_OFF_MIN_DC || red.dc < PROBE_OFF_MIN_DC {
        ProbeOffReason::LowDc
    } else if ir.dc > PROBE_OFF_MAX_DC || red.dc > PROBE_OFF_MAX_DC {
        ProbeOffReason::Saturated
    } else if perfusion_ir < PROBE_OFF_MIN_PERFUSION {
        ProbeOffReason::LowPerfusion
    } else if peak_count < 2 {
        ProbeOffReason::NoPeaks
    } else if ir.ac < PROBE_OFF_MIN_AC {
        ProbeOffReason::WeakAc
    } else {
        ProbeOffReason::None
    }
}
