//! Stand-in for the screen stack: reads the vital channels, drains the plot
//! queue while a waveform screen is showing, and beats the display heartbeat.

use super::channels::VitalChannels;
use crate::algorithms::VitalStats;
use crate::buffer::SampleConsumer;
use crate::reliability::{HeartbeatRegistry, TaskKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// What the pipeline needs to know about the screen stack.
#[cfg_attr(test, automock)]
pub trait DisplayHooks: Send + Sync {
    fn is_waveform_screen_active(&self) -> bool;
}

/// Flag flipped by whichever screen is in front.
#[derive(Debug, Default)]
pub struct WaveformScreenFlag {
    active: AtomicBool,
}

impl WaveformScreenFlag {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }
}

impl DisplayHooks for WaveformScreenFlag {
    fn is_waveform_screen_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Refresh period of the plot and the vitals readout.
    pub refresh: Duration,
    /// Refreshes between vitals log lines.
    pub log_every: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh: Duration::from_millis(40),
            log_every: 125,
        }
    }
}

pub struct DisplayMonitor<H: DisplayHooks> {
    hooks: Arc<H>,
    channels: Arc<VitalChannels>,
    plot: SampleConsumer,
    heartbeats: Arc<HeartbeatRegistry>,
    vital_stats: Arc<Mutex<VitalStats>>,
    config: DisplayConfig,
    plotted: AtomicU64,
    discarded: AtomicU64,
}

impl<H: DisplayHooks> DisplayMonitor<H> {
    pub fn new(
        hooks: Arc<H>,
        channels: Arc<VitalChannels>,
        plot: SampleConsumer,
        heartbeats: Arc<HeartbeatRegistry>,
        vital_stats: Arc<Mutex<VitalStats>>,
        config: DisplayConfig,
    ) -> Self {
        Self {
            hooks,
            channels,
            plot,
            heartbeats,
            vital_stats,
            config,
            plotted: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// One refresh: plot samples are consumed either way so the queue never
    /// backs up, but only counted as plotted when the waveform is visible.
    pub fn refresh(&mut self) -> usize {
        self.heartbeats.beat(TaskKind::Display);
        let drained = self.plot.drain_ready().count();
        if self.hooks.is_waveform_screen_active() {
            self.plotted.fetch_add(drained as u64, Ordering::Relaxed);
        } else {
            self.discarded.fetch_add(drained as u64, Ordering::Relaxed);
        }
        drained
    }

    pub fn plotted(&self) -> u64 {
        self.plotted.load(Ordering::Relaxed)
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn log_vitals(&self) {
        let snapshot = self.channels.snapshot();
        let stats = self.vital_stats.lock();
        info!(
            heart_rate = snapshot.heart_rate.map(|hr| hr.bpm),
            hr_source = snapshot.heart_rate.map(|hr| hr.source.as_str()),
            spo2 = snapshot.spo2,
            respiration = snapshot.respiration,
            temperature_centi_c = snapshot.temperature_centi_c,
            battery = snapshot.battery_percent,
            hr_trend = ?stats.heart_rate_trend(),
            hr_summary = ?stats.heart_rate.summary(),
            "Vitals"
        );
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let log_every = self.config.log_every.max(1);
        let mut refreshes: u32 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.refresh();
                    refreshes = refreshes.wrapping_add(1);
                    if refreshes % log_every == 0 {
                        self.log_vitals();
                    }
                }
            }
        }

        debug!(
            plotted = self.plotted(),
            discarded = self.discarded(),
            "Display monitor stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::bounded;
    use crate::domain::SensorSample;

    fn monitor<H: DisplayHooks>(hooks: H) -> (DisplayMonitor<H>, crate::buffer::SampleProducer) {
        let (tx, rx) = bounded(32).unwrap();
        let monitor = DisplayMonitor::new(
            Arc::new(hooks),
            Arc::new(VitalChannels::new()),
            rx,
            Arc::new(HeartbeatRegistry::new()),
            Arc::new(Mutex::new(VitalStats::default())),
            DisplayConfig::default(),
        );
        (monitor, tx)
    }

    #[test]
    fn test_plot_counted_only_when_waveform_visible() {
        let mut hooks = MockDisplayHooks::new();
        let mut visible = false;
        hooks.expect_is_waveform_screen_active().returning(move || {
            visible = !visible;
            visible
        });
        let (mut monitor, tx) = monitor(hooks);

        for _ in 0..3 {
            let _ = tx.enqueue(SensorSample::default()).unwrap();
        }
        assert_eq!(monitor.refresh(), 3);
        for _ in 0..2 {
            let _ = tx.enqueue(SensorSample::default()).unwrap();
        }
        assert_eq!(monitor.refresh(), 2);

        assert_eq!(monitor.plotted(), 3);
        assert_eq!(monitor.discarded(), 2);
    }

    #[test]
    fn test_refresh_beats_display_heartbeat() {
        let (mut monitor, _tx) = monitor(WaveformScreenFlag::new(true));
        assert!(monitor.heartbeats.last_beat(TaskKind::Display).is_none());
        monitor.refresh();
        assert!(monitor.heartbeats.last_beat(TaskKind::Display).is_some());
    }

    #[test]
    fn test_flag_toggles() {
        let flag = WaveformScreenFlag::default();
        assert!(!flag.is_waveform_screen_active());
        flag.set_active(true);
        assert!(flag.is_waveform_screen_active());
    }
}
