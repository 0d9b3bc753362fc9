//! The vital-signs consumer task.
//!
//! Drains the sample queue completely, then waits for more. Each sample
//! feeds the SpO2 window, the decimated respiration detector and the host
//! stream; every refilled window runs the estimator, after which probe
//! state, quality gates and smoothing decide what gets published.

use super::channels::{HeartRateReading, VitalChannels};
use super::selector::HrSourceSelector;
use super::smoothing::{SmoothOutcome, SmoothingHistory};
use crate::acquisition::RateLimitedLog;
use crate::algorithms::{
    EstimatorConfig, ProbeState, ProbeTransition, RespirationConfig, RespirationDetector,
    Spo2Estimate, Spo2Estimator, Spo2Window, VitalStats,
};
use crate::buffer::{SampleConsumer, StreamRingBuffer, WriteOutcome};
use crate::domain::{HrSource, SensorSample};
use crate::reliability::{HeartbeatRegistry, TaskKind};
use crate::stream::{SAMPLES_PER_PACKET, StreamEncoder, StreamFormat, StreamVitals};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// HR is published only above 1.00 % IR perfusion.
const MIN_HR_PERFUSION: u16 = 100;
const MIN_SPO2_CONFIDENCE: u8 = 50;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub estimator: EstimatorConfig,
    pub respiration: RespirationConfig,
    /// Fused samples averaged into one respiration detector sample.
    pub bioz_decimation: usize,
    pub stream_format: StreamFormat,
    pub stream_batch: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            respiration: RespirationConfig::default(),
            bioz_decimation: 4,
            stream_format: StreamFormat::default(),
            stream_batch: SAMPLES_PER_PACKET,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConsumerStats {
    samples: AtomicU64,
    estimates: AtomicU64,
    stream_packets: AtomicU64,
    stream_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerSnapshot {
    pub samples: u64,
    pub estimates: u64,
    pub stream_packets: u64,
    pub stream_dropped: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            estimates: self.estimates.load(Ordering::Relaxed),
            stream_packets: self.stream_packets.load(Ordering::Relaxed),
            stream_dropped: self.stream_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Block average feeding the respiration detector at a fraction of the
/// fused sample rate.
#[derive(Debug, Clone)]
struct Decimator {
    factor: usize,
    sum: i64,
    count: usize,
}

impl Decimator {
    fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
            sum: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: i32) -> Option<i32> {
        self.sum += i64::from(value);
        self.count += 1;
        if self.count < self.factor {
            return None;
        }
        let mean = self.sum / self.count as i64;
        self.sum = 0;
        self.count = 0;
        Some(mean as i32)
    }
}

pub struct VitalConsumer {
    queue: SampleConsumer,
    channels: Arc<VitalChannels>,
    heartbeats: Arc<HeartbeatRegistry>,
    selector: Arc<HrSourceSelector>,
    smoothing: Arc<SmoothingHistory>,
    vital_stats: Arc<Mutex<VitalStats>>,
    stream: Option<Arc<StreamRingBuffer>>,
    stats: Arc<ConsumerStats>,

    window: Spo2Window,
    estimator: Spo2Estimator,
    respiration: RespirationDetector,
    decimator: Decimator,
    probe: ProbeState,
    encoder: StreamEncoder,
    packets: Vec<Bytes>,
    stream_vitals: StreamVitals,
    stream_drop_log: RateLimitedLog,
    last_ecg_hr: Option<Option<u16>>,
    last_respiration: Option<u8>,
}

impl VitalConsumer {
    pub fn new(
        config: ConsumerConfig,
        queue: SampleConsumer,
        channels: Arc<VitalChannels>,
        heartbeats: Arc<HeartbeatRegistry>,
    ) -> Self {
        Self {
            queue,
            channels,
            heartbeats,
            selector: Arc::new(HrSourceSelector::default()),
            smoothing: Arc::new(SmoothingHistory::new()),
            vital_stats: Arc::new(Mutex::new(VitalStats::default())),
            stream: None,
            stats: Arc::new(ConsumerStats::default()),
            window: Spo2Window::for_config(&config.estimator),
            estimator: Spo2Estimator::new(config.estimator),
            respiration: RespirationDetector::new(config.respiration),
            decimator: Decimator::new(config.bioz_decimation),
            probe: ProbeState::default(),
            encoder: StreamEncoder::new(config.stream_format, config.stream_batch),
            packets: Vec::with_capacity(2),
            stream_vitals: StreamVitals::default(),
            stream_drop_log: RateLimitedLog::default(),
            last_ecg_hr: None,
            last_respiration: None,
        }
    }

    pub fn with_selector(mut self, selector: Arc<HrSourceSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_smoothing(mut self, smoothing: Arc<SmoothingHistory>) -> Self {
        self.smoothing = smoothing;
        self
    }

    pub fn with_vital_stats(mut self, vital_stats: Arc<Mutex<VitalStats>>) -> Self {
        self.vital_stats = vital_stats;
        self
    }

    pub fn with_stream(mut self, ring: Arc<StreamRingBuffer>) -> Self {
        self.stream = Some(ring);
        self
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    pub fn probe_attached(&self) -> bool {
        !self.probe.is_off()
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(format = ?self.encoder.format(), "Consumer started");

        loop {
            self.heartbeats.beat(TaskKind::Consumer);
            let hr_source = self.selector.get();
            let drained = self.drain_ready(hr_source);
            if drained > 0 {
                trace!(drained, "Drained sample queue");
            }

            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.queue.recv() => next,
            };
            match next {
                Some(sample) => self.process_sample(&sample, hr_source),
                None => {
                    info!("Sample queue closed, stopping consumer");
                    break;
                }
            }
        }

        info!(stats = ?self.stats.snapshot(), "Consumer stopped");
    }

    /// Processes everything already queued without waiting.
    pub fn drain_ready(&mut self, hr_source: HrSource) -> usize {
        let mut drained = 0;
        while let Ok(Some(sample)) = self.queue.try_dequeue() {
            self.process_sample(&sample, hr_source);
            drained += 1;
        }
        drained
    }

    pub fn process_sample(&mut self, sample: &SensorSample, hr_source: HrSource) {
        self.stats.samples.fetch_add(1, Ordering::Relaxed);

        if self.window.push(sample.ppg_ir, sample.ppg_red) {
            let estimate = self.estimator.estimate(self.window.ir(), self.window.red());
            self.window.shift();
            self.stats.estimates.fetch_add(1, Ordering::Relaxed);
            self.apply_estimate(&estimate, hr_source);
            self.record_stats();
        }

        if let Some(bioz) = self.decimator.push(sample.bioz) {
            let rate = self.respiration.process(bioz);
            if self.last_respiration != Some(rate) {
                debug!(rate, "Respiration rate changed");
                self.channels.publish_respiration(rate);
                self.last_respiration = Some(rate);
                self.stream_vitals.respiration = rate;
            }
        }

        if hr_source == HrSource::Ecg {
            self.publish_ecg_heart_rate(sample);
        }

        self.write_stream(sample);
    }

    fn publish_ecg_heart_rate(&mut self, sample: &SensorSample) {
        let bpm = (!sample.ecg_lead_off && sample.heart_rate > 0).then_some(sample.heart_rate);
        if self.last_ecg_hr == Some(bpm) {
            return;
        }
        self.last_ecg_hr = Some(bpm);
        self.channels.publish_heart_rate(bpm.map(|bpm| HeartRateReading {
            bpm,
            source: HrSource::Ecg,
        }));
        self.stream_vitals.heart_rate = bpm.unwrap_or(0).min(255) as u8;
    }

    fn apply_estimate(&mut self, estimate: &Spo2Estimate, hr_source: HrSource) {
        let quality = &estimate.quality;

        match self.probe.update(quality.probe_off) {
            Some(ProbeTransition::Detached(reason)) => {
                info!(?reason, "PPG probe detached, withdrawing PPG readings");
                self.smoothing.clear();
                self.channels.publish_spo2(None);
                self.stream_vitals.spo2 = 0;
                if hr_source == HrSource::Ppg {
                    self.channels.publish_heart_rate(None);
                    self.stream_vitals.heart_rate = 0;
                }
            }
            Some(ProbeTransition::Attached) => info!("PPG probe attached"),
            None => {}
        }
        if self.probe.is_off() {
            return;
        }

        if self.smoothing.observe_perfusion(quality.perfusion_ir) {
            debug!(perfusion = quality.perfusion_ir, "Low perfusion, SpO2 history cleared");
        }

        if estimate.spo2_valid && quality.confidence >= MIN_SPO2_CONFIDENCE {
            let outcome = self.smoothing.push_spo2(estimate.spo2);
            if let SmoothOutcome::Rejected { held } = outcome {
                debug!(raw = estimate.spo2, held, "SpO2 outlier rejected");
            }
            let spo2 = outcome.value().clamp(0, 100) as u8;
            self.channels.publish_spo2(Some(spo2));
            self.stream_vitals.spo2 = spo2;
        }

        if estimate.hr_valid && quality.perfusion_ir >= MIN_HR_PERFUSION {
            let outcome = self.smoothing.push_heart_rate(estimate.heart_rate);
            if let SmoothOutcome::Rejected { held } = outcome {
                debug!(raw = estimate.heart_rate, held, "Heart-rate outlier rejected");
            }
            if hr_source == HrSource::Ppg {
                let bpm = outcome.value().max(0) as u16;
                self.channels.publish_heart_rate(Some(HeartRateReading {
                    bpm,
                    source: HrSource::Ppg,
                }));
                self.stream_vitals.heart_rate = bpm.min(255) as u8;
            }
        }
    }

    /// Runs once per estimation pass, i.e. about once a second.
    fn record_stats(&mut self) {
        let snapshot = self.channels.snapshot();
        let now = Instant::now();
        let mut stats = self.vital_stats.lock();
        if let Some(hr) = snapshot.heart_rate {
            stats.record_heart_rate(hr.bpm, now);
        }
        if let Some(spo2) = snapshot.spo2 {
            stats.record_spo2(spo2, now);
        }
        stats.record_respiration(snapshot.respiration, now);
        if let Some(temperature) = snapshot.temperature_centi_c {
            stats.record_temperature(temperature, now);
            self.stream_vitals.temperature_centi_c = temperature;
        }
    }

    fn write_stream(&mut self, sample: &SensorSample) {
        let Some(ring) = &self.stream else {
            return;
        };

        self.encoder.push(sample, self.stream_vitals, &mut self.packets);
        for packet in self.packets.drain(..) {
            match ring.write_packet(&packet) {
                WriteOutcome::Written => {
                    self.stats.stream_packets.fetch_add(1, Ordering::Relaxed);
                }
                WriteOutcome::Dropped => {
                    self.stats.stream_dropped.fetch_add(1, Ordering::Relaxed);
                    if let Some(count) = self.stream_drop_log.record() {
                        debug!(count, pending = ring.pending(), "Stream ring full, packet dropped");
                    }
                }
            }
        }
    }
}
