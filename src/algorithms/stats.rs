//! Rolling one-minute statistics of published vitals.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Slots per signal; one published value per second fills a minute.
pub const STATS_WINDOW: usize = 60;
const TREND_MIN_SAMPLES: usize = 15;
const TREND_RECENT: std::ops::Range<usize> = 0..3;
const TREND_PAST: std::ops::Range<usize> = 10..13;
const TREND_THRESHOLD: i32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Trend {
    Rising,
    Falling,
    #[default]
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub min: i32,
    pub max: i32,
    pub avg: i32,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct RollingStats {
    values: [i32; STATS_WINDOW],
    cursor: usize,
    len: usize,
    sum: i64,
    last_update: Option<Instant>,
}

impl Default for RollingStats {
    fn default() -> Self {
        Self {
            values: [0; STATS_WINDOW],
            cursor: 0,
            len: 0,
            sum: 0,
            last_update: None,
        }
    }
}

impl RollingStats {
    pub fn record(&mut self, value: i32, now: Instant) {
        if self.len == STATS_WINDOW {
            self.sum -= i64::from(self.values[self.cursor]);
        } else {
            self.len += 1;
        }
        self.values[self.cursor] = value;
        self.sum += i64::from(value);
        self.cursor = (self.cursor + 1) % STATS_WINDOW;
        self.last_update = Some(now);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn summary(&self) -> Option<StatsSummary> {
        let live = &self.values[..self.len];
        let min = live.iter().copied().min()?;
        let max = live.iter().copied().max()?;
        Some(StatsSummary {
            min,
            max,
            avg: (self.sum / self.len as i64) as i32,
            count: self.len,
        })
    }

    pub fn since_update(&self, now: Instant) -> Option<Duration> {
        self.last_update.map(|at| now.saturating_duration_since(at))
    }

    /// `back = 0` is the newest value.
    fn nth_back(&self, back: usize) -> Option<i32> {
        if back >= self.len {
            return None;
        }
        let idx = (self.cursor + STATS_WINDOW - 1 - back) % STATS_WINDOW;
        Some(self.values[idx])
    }

    fn mean_back(&self, range: std::ops::Range<usize>) -> Option<i32> {
        let picked: Vec<i32> = range.filter_map(|back| self.nth_back(back)).collect();
        if picked.is_empty() {
            return None;
        }
        Some(picked.iter().sum::<i32>() / picked.len() as i32)
    }

    /// Mean of the latest three values against the mean of those ten to
    /// thirteen updates back.
    pub fn trend(&self) -> Trend {
        if self.len < TREND_MIN_SAMPLES {
            return Trend::Stable;
        }
        match (self.mean_back(TREND_RECENT), self.mean_back(TREND_PAST)) {
            (Some(recent), Some(past)) if recent > past + TREND_THRESHOLD => Trend::Rising,
            (Some(recent), Some(past)) if recent < past - TREND_THRESHOLD => Trend::Falling,
            _ => Trend::Stable,
        }
    }
}

/// Statistics for every published vital. Zero and out-of-range values are
/// not recorded.
#[derive(Debug, Clone, Default)]
pub struct VitalStats {
    pub heart_rate: RollingStats,
    pub spo2: RollingStats,
    pub respiration: RollingStats,
    /// Hundredths of a degree Celsius.
    pub temperature: RollingStats,
}

impl VitalStats {
    pub fn record_heart_rate(&mut self, bpm: u16, now: Instant) {
        if bpm > 0 {
            self.heart_rate.record(i32::from(bpm), now);
        }
    }

    pub fn record_spo2(&mut self, percent: u8, now: Instant) {
        if percent > 0 {
            self.spo2.record(i32::from(percent), now);
        }
    }

    pub fn record_respiration(&mut self, rate: u8, now: Instant) {
        if rate > 0 {
            self.respiration.record(i32::from(rate), now);
        }
    }

    pub fn record_temperature(&mut self, centi_c: i16, now: Instant) {
        if (-5_000..=15_000).contains(&centi_c) {
            self.temperature.record(i32::from(centi_c), now);
        }
    }

    pub fn heart_rate_trend(&self) -> Trend {
        self.heart_rate.trend()
    }
}
