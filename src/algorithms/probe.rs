use super::quality::ProbeOffReason;
use tracing::info;

pub const DEFAULT_OFF_THRESHOLD: u8 = 4;
pub const DEFAULT_ON_THRESHOLD: u8 = 4;

/// Reported when the filtered probe state flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTransition {
    Detached(ProbeOffReason),
    Attached,
}

/// Consecutive-count filter over per-window probe-off detections.
///
/// Starts detached; a flip needs `off_threshold` (or `on_threshold`)
/// agreeing detections in a row, so a single noisy window never toggles it.
#[derive(Debug, Clone)]
pub struct ProbeState {
    off_threshold: u8,
    on_threshold: u8,
    consecutive_off: u8,
    consecutive_on: u8,
    off: bool,
    last_reason: ProbeOffReason,
}

impl ProbeState {
    pub fn new(off_threshold: u8, on_threshold: u8) -> Self {
        Self {
            off_threshold: off_threshold.max(1),
            on_threshold: on_threshold.max(1),
            consecutive_off: 0,
            consecutive_on: 0,
            off: true,
            last_reason: ProbeOffReason::None,
        }
    }

    pub fn is_off(&self) -> bool {
        self.off
    }

    /// Most recent raw detection, filtered or not.
    pub fn last_reason(&self) -> ProbeOffReason {
        self.last_reason
    }

    pub fn update(&mut self, reason: ProbeOffReason) -> Option<ProbeTransition> {
        self.last_reason = reason;

        if reason.is_off() {
            self.consecutive_off = self.consecutive_off.saturating_add(1);
            self.consecutive_on = 0;
            if !self.off && self.consecutive_off >= self.off_threshold {
                self.off = true;
                info!(?reason, detections = self.consecutive_off, "Probe off");
                return Some(ProbeTransition::Detached(reason));
            }
        } else {
            self.consecutive_on = self.consecutive_on.saturating_add(1);
            self.consecutive_off = 0;
            if self.off && self.consecutive_on >= self.on_threshold {
                self.off = false;
                info!(detections = self.consecutive_on, "Probe on");
                return Some(ProbeTransition::Attached);
            }
        }

        None
    }
}

impl Default for ProbeState {
    fn default() -> Self {
        Self::new(DEFAULT_OFF_THRESHOLD, DEFAULT_ON_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_off_and_needs_consecutive_on() {
        let mut probe = ProbeState::default();
        assert!(probe.is_off());
        for _ in 0..3 {
            assert_eq!(probe.update(ProbeOffReason::None), None);
        }
        assert_eq!(probe.update(ProbeOffReason::None), Some(ProbeTransition::Attached));
        assert!(!probe.is_off());
    }

    #[test]
    fn test_single_glitch_does_not_flip() {
        let mut probe = ProbeState::new(4, 1);
        probe.update(ProbeOffReason::None);
        assert!(!probe.is_off());

        for _ in 0..3 {
            probe.update(ProbeOffReason::WeakAc);
        }
        probe.update(ProbeOffReason::None);
        for _ in 0..3 {
            probe.update(ProbeOffReason::LowDc);
        }
        assert!(!probe.is_off());
        assert_eq!(probe.last_reason(), ProbeOffReason::LowDc);

        assert_eq!(
            probe.update(ProbeOffReason::LowDc),
            Some(ProbeTransition::Detached(ProbeOffReason::LowDc))
        );
        assert!(probe.is_off());
    }

    #[test]
    fn test_zero_threshold_treated_as_one() {
        let mut probe = ProbeState::new(0, 0);
        assert_eq!(probe.update(ProbeOffReason::None), Some(ProbeTransition::Attached));
        assert!(matches!(
            probe.update(ProbeOffReason::NoPeaks),
            Some(ProbeTransition::Detached(_))
        ));
    }
}
