use std::sync::Arc;
use vitals_core::acquisition::{
    AcquisitionScheduler, SchedulerConfig, SyntheticBus, SyntheticConfig, TickOutcome,
};
use vitals_core::buffer::bounded;
use vitals_core::domain::HrSource;
use vitals_core::pipeline::{ConsumerConfig, VitalChannels, VitalConsumer};
use vitals_core::reliability::HeartbeatRegistry;

const TICKS_PER_SECOND: usize = 128;

struct Rig {
    scheduler: AcquisitionScheduler<SyntheticBus>,
    consumer: VitalConsumer,
    channels: Arc<VitalChannels>,
}

impl Rig {
    fn new(synthetic: SyntheticConfig, consumer: ConsumerConfig) -> Self {
        let (tx, rx) = bounded(TICKS_PER_SECOND * 4).unwrap();
        let channels = Arc::new(VitalChannels::new());
        let heartbeats = Arc::new(HeartbeatRegistry::new());
        let scheduler = AcquisitionScheduler::new(
            SyntheticBus::new(synthetic),
            SchedulerConfig::default(),
            tx,
            channels.clone(),
            heartbeats.clone(),
        );
        let consumer = VitalConsumer::new(consumer, rx, channels.clone(), heartbeats);
        Self {
            scheduler,
            consumer,
            channels,
        }
    }

    /// Simulated seconds: one second of ticks, then the consumer drains.
    fn run_seconds(&mut self, seconds: usize, hr_source: HrSource) {
        for _ in 0..seconds {
            for _ in 0..TICKS_PER_SECOND {
                assert_eq!(self.scheduler.tick(), TickOutcome::Fused(1));
            }
            assert_eq!(self.consumer.drain_ready(hr_source), TICKS_PER_SECOND);
        }
    }
}

#[test]
fn test_healthy_subject_reaches_steady_vitals() {
    let mut rig = Rig::new(SyntheticConfig::default(), ConsumerConfig::default());
    rig.run_seconds(40, HrSource::Ecg);

    let snapshot = rig.channels.snapshot();
    let hr = snapshot.heart_rate.expect("ECG heart rate published");
    assert_eq!(hr.source, HrSource::Ecg);
    assert!((73..=77).contains(&hr.bpm), "hr {}", hr.bpm);

    let spo2 = snapshot.spo2.expect("SpO2 published once the probe attached");
    assert!((95..=100).contains(&spo2), "spo2 {spo2}");
    assert!(rig.consumer.probe_attached());

    assert!(
        (13..=17).contains(&snapshot.respiration),
        "respiration {}",
        snapshot.respiration
    );
    assert_eq!(snapshot.temperature_centi_c, Some(3_650));
    assert_eq!(snapshot.battery_percent, Some(87));

    let stats = rig.scheduler.stats().snapshot();
    assert_eq!(stats.samples, 40 * TICKS_PER_SECOND as u64);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.bus_errors, 0);
}

#[test]
fn test_detached_subject_publishes_nothing() {
    let mut rig = Rig::new(
        SyntheticConfig {
            contact: false,
            ..SyntheticConfig::default()
        },
        ConsumerConfig::default(),
    );
    rig.run_seconds(12, HrSource::Ecg);

    let snapshot = rig.channels.snapshot();
    assert_eq!(snapshot.heart_rate, None);
    assert_eq!(snapshot.spo2, None);
    assert!(!rig.consumer.probe_attached());
}

#[test]
fn test_ppg_source_reports_pulse_rate() {
    let mut rig = Rig::new(SyntheticConfig::default(), ConsumerConfig::default());
    rig.run_seconds(20, HrSource::Ppg);

    let snapshot = rig.channels.snapshot();
    let hr = snapshot.heart_rate.expect("PPG heart rate published");
    assert_eq!(hr.source, HrSource::Ppg);
    assert!((70..=80).contains(&hr.bpm), "hr {}", hr.bpm);
    let spo2 = snapshot.spo2.expect("SpO2 published alongside the pulse rate");
    assert!((95..=100).contains(&spo2), "spo2 {spo2}");
}

#[test]
fn test_flaky_bus_keeps_pipeline_running() {
    let mut rig = Rig::new(
        SyntheticConfig {
            failure_rate: 0.05,
            ..SyntheticConfig::default()
        },
        ConsumerConfig::default(),
    );

    let mut fused = 0;
    let mut skipped = 0;
    for _ in 0..(20 * TICKS_PER_SECOND) {
        match rig.scheduler.tick() {
            TickOutcome::Fused(n) => fused += n,
            TickOutcome::Skipped => skipped += 1,
            TickOutcome::Closed => panic!("queue closed"),
        }
        if fused % TICKS_PER_SECOND == 0 {
            rig.consumer.drain_ready(HrSource::Ecg);
        }
    }
    rig.consumer.drain_ready(HrSource::Ecg);

    let stats = rig.scheduler.stats().snapshot();
    assert!(skipped > 0);
    assert!(stats.bus_errors >= skipped as u64);
    assert_eq!(stats.samples, fused as u64);
    assert_eq!(rig.consumer.stats().snapshot().samples, fused as u64);
}
