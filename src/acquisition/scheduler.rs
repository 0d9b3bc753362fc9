//! Periodic acquisition worker.
//!
//! Every tick issues one ECG/BioZ transaction (and a PPG transaction every
//! `ppg_divider` ticks), decodes the burst, fuses each ECG sample with the
//! matching BioZ sample and the last PPG reading, and enqueues the result.
//! A failed transaction skips the tick; it never stalls the loop.

use super::bus::{BusError, SensorBus};
use super::decoder::{DecodedBurst, FrameDecoder, PpgReading};
use super::rate_limit::RateLimitedLog;
use crate::buffer::{EnqueueOutcome, QueueError, SampleProducer};
use crate::domain::SensorSample;
use crate::pipeline::VitalChannels;
use crate::reliability::{HeartbeatRegistry, TaskKind};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick period; 7.8125 ms gives 128 transactions per second.
    pub period: Duration,
    pub ppg_divider: u32,
    /// Ticks between temperature/battery reads.
    pub housekeeping_every: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_micros(7_812),
            ppg_divider: 1,
            housekeeping_every: 128,
        }
    }
}

#[derive(Debug, Default)]
pub struct AcquisitionStats {
    ticks: AtomicU64,
    bus_errors: AtomicU64,
    samples: AtomicU64,
    dropped: AtomicU64,
    plot_dropped: AtomicU64,
    fifo_resets: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AcquisitionSnapshot {
    pub ticks: u64,
    pub bus_errors: u64,
    pub samples: u64,
    pub dropped: u64,
    pub plot_dropped: u64,
    pub fifo_resets: u64,
}

impl AcquisitionStats {
    pub fn snapshot(&self) -> AcquisitionSnapshot {
        AcquisitionSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            bus_errors: self.bus_errors.load(Ordering::Relaxed),
            samples: self.samples.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            plot_dropped: self.plot_dropped.load(Ordering::Relaxed),
            fifo_resets: self.fifo_resets.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Number of fused samples offered to the sample queue.
    Fused(usize),
    /// The ECG/BioZ transaction failed; nothing was produced this tick.
    Skipped,
    /// The consumer is gone.
    Closed,
}

pub struct AcquisitionScheduler<B: SensorBus> {
    bus: B,
    decoder: FrameDecoder,
    config: SchedulerConfig,
    samples: SampleProducer,
    plot: Option<SampleProducer>,
    channels: Arc<VitalChannels>,
    heartbeats: Arc<HeartbeatRegistry>,
    stats: Arc<AcquisitionStats>,
    bus_error_log: RateLimitedLog,
    drop_log: RateLimitedLog,
    last_ppg: PpgReading,
    last_bioz: i32,
    tick: u64,
}

impl<B: SensorBus> AcquisitionScheduler<B> {
    pub fn new(
        bus: B,
        config: SchedulerConfig,
        samples: SampleProducer,
        channels: Arc<VitalChannels>,
        heartbeats: Arc<HeartbeatRegistry>,
    ) -> Self {
        Self {
            bus,
            decoder: FrameDecoder::new(),
            config: SchedulerConfig {
                ppg_divider: config.ppg_divider.max(1),
                housekeeping_every: config.housekeeping_every.max(1),
                ..config
            },
            samples,
            plot: None,
            channels,
            heartbeats,
            stats: Arc::new(AcquisitionStats::default()),
            bus_error_log: RateLimitedLog::default(),
            drop_log: RateLimitedLog::default(),
            last_ppg: PpgReading::default(),
            last_bioz: 0,
            tick: 0,
        }
    }

    /// Also forwards every fused sample to the raw-waveform queue.
    pub fn with_plot_queue(mut self, plot: SampleProducer) -> Self {
        self.plot = Some(plot);
        self
    }

    pub fn stats(&self) -> Arc<AcquisitionStats> {
        self.stats.clone()
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period = ?self.config.period, ppg_divider = self.config.ppg_divider, "Acquisition started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if self.tick() == TickOutcome::Closed {
                        info!("Sample queue closed, stopping acquisition");
                        break;
                    }
                }
            }
        }

        info!(stats = ?self.stats.snapshot(), "Acquisition stopped");
    }

    /// One scheduler invocation.
    pub fn tick(&mut self) -> TickOutcome {
        let tick = self.tick;
        self.tick += 1;
        self.heartbeats.beat(TaskKind::Acquisition);
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);

        if tick % u64::from(self.config.housekeeping_every) == 0 {
            match self.bus.read_housekeeping() {
                Ok(housekeeping) => self.channels.publish_housekeeping(housekeeping),
                Err(e) => self.report_bus_error("housekeeping", &e),
            }
        }

        if tick % u64::from(self.config.ppg_divider) == 0 {
            match self.bus.read_ppg() {
                Ok(frame) => self.last_ppg = PpgReading::from(frame),
                // The previous reading is reused until the next good one
                Err(e) => self.report_bus_error("ppg", &e),
            }
        }

        let frame = match self.bus.read_ecg_bioz() {
            Ok(frame) => frame,
            Err(e) => {
                self.report_bus_error("ecg/bioz", &e);
                return TickOutcome::Skipped;
            }
        };

        let burst = self.decoder.decode(&frame);
        if burst.fifo_reset {
            self.stats.fifo_resets.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.bus.reset_fifo() {
                self.report_bus_error("fifo reset", &e);
            }
        }

        match self.fuse_and_enqueue(&burst) {
            Ok(count) => TickOutcome::Fused(count),
            Err(QueueError::Closed) => TickOutcome::Closed,
            Err(e) => {
                warn!(error = %e, "Unexpected sample queue error");
                TickOutcome::Skipped
            }
        }
    }

    fn fuse_and_enqueue(&mut self, burst: &DecodedBurst) -> Result<usize, QueueError> {
        let n_ecg = burst.ecg.len();
        let n_bioz = burst.bioz.len();

        for (i, &ecg) in burst.ecg.iter().enumerate() {
            let bioz = if n_bioz == 0 {
                self.last_bioz
            } else {
                burst.bioz[(i * n_bioz / n_ecg).min(n_bioz - 1)]
            };

            let sample = SensorSample {
                ecg,
                bioz,
                ppg_ir: self.last_ppg.ir,
                ppg_red: self.last_ppg.red,
                heart_rate: burst.heart_rate,
                rr_interval: burst.rr_interval,
                ecg_lead_off: burst.ecg_lead_off,
                bioz_lead_off: burst.bioz_lead_off,
            };

            if let Some(plot) = &self.plot {
                // The display may not be draining; only the counter matters here
                if let Ok(EnqueueOutcome::Dropped) = plot.enqueue(sample) {
                    self.stats.plot_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }

            match self.samples.enqueue(sample)? {
                EnqueueOutcome::Enqueued => {
                    self.stats.samples.fetch_add(1, Ordering::Relaxed);
                }
                EnqueueOutcome::Dropped => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    if let Some(count) = self.drop_log.record() {
                        warn!(count, "Sample queue full, dropping newest sample");
                    }
                }
            }
        }

        if let Some(&last) = burst.bioz.last() {
            self.last_bioz = last;
        }

        Ok(n_ecg)
    }

    fn report_bus_error(&self, transaction: &str, error: &BusError) {
        self.stats.bus_errors.fetch_add(1, Ordering::Relaxed);
        match self.bus_error_log.record() {
            Some(count) => warn!(transaction, count, error = %error, "Sensor bus transaction failed"),
            None => debug!(transaction, error = %error, "Sensor bus transaction failed"),
        }
    }
}
