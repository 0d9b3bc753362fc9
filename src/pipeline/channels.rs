//! Latest-value publish points for every vital.
//!
//! Backed by `tokio::sync::watch`: a publish never waits for a reader, and a
//! slow reader only ever sees the newest value.

use crate::acquisition::Housekeeping;
use crate::domain::HrSource;
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeartRateReading {
    pub bpm: u16,
    pub source: HrSource,
}

/// Current value of every channel, `None` where nothing valid is published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VitalSnapshot {
    pub heart_rate: Option<HeartRateReading>,
    pub spo2: Option<u8>,
    pub respiration: u8,
    pub temperature_centi_c: Option<i16>,
    pub battery_percent: Option<u8>,
}

/// Independent receivers for one subscriber.
#[derive(Debug, Clone)]
pub struct VitalReceivers {
    pub heart_rate: watch::Receiver<Option<HeartRateReading>>,
    pub spo2: watch::Receiver<Option<u8>>,
    pub respiration: watch::Receiver<u8>,
    pub temperature: watch::Receiver<Option<i16>>,
    pub battery: watch::Receiver<Option<u8>>,
}

#[derive(Debug)]
pub struct VitalChannels {
    heart_rate: watch::Sender<Option<HeartRateReading>>,
    spo2: watch::Sender<Option<u8>>,
    respiration: watch::Sender<u8>,
    temperature: watch::Sender<Option<i16>>,
    battery: watch::Sender<Option<u8>>,
}

impl VitalChannels {
    pub fn new() -> Self {
        Self {
            heart_rate: watch::Sender::new(None),
            spo2: watch::Sender::new(None),
            respiration: watch::Sender::new(0),
            temperature: watch::Sender::new(None),
            battery: watch::Sender::new(None),
        }
    }

    pub fn subscribe(&self) -> VitalReceivers {
        VitalReceivers {
            heart_rate: self.heart_rate.subscribe(),
            spo2: self.spo2.subscribe(),
            respiration: self.respiration.subscribe(),
            temperature: self.temperature.subscribe(),
            battery: self.battery.subscribe(),
        }
    }

    pub fn publish_heart_rate(&self, reading: Option<HeartRateReading>) {
        self.heart_rate.send_replace(reading);
    }

    pub fn publish_spo2(&self, spo2: Option<u8>) {
        self.spo2.send_replace(spo2);
    }

    pub fn publish_respiration(&self, rate: u8) {
        self.respiration.send_replace(rate);
    }

    pub fn publish_housekeeping(&self, housekeeping: Housekeeping) {
        self.temperature.send_replace(Some(housekeeping.temperature_centi_c));
        self.battery.send_replace(Some(housekeeping.battery_percent));
    }

    pub fn snapshot(&self) -> VitalSnapshot {
        VitalSnapshot {
            heart_rate: *self.heart_rate.borrow(),
            spo2: *self.spo2.borrow(),
            respiration: *self.respiration.borrow(),
            temperature_centi_c: *self.temperature.borrow(),
            battery_percent: *self.battery.borrow(),
        }
    }
}

impl Default for VitalChannels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_does_not_block() {
        let channels = VitalChannels::new();
        channels.publish_spo2(Some(97));
        channels.publish_respiration(14);
        let snapshot = channels.snapshot();
        assert_eq!(snapshot.spo2, Some(97));
        assert_eq!(snapshot.respiration, 14);
        assert_eq!(snapshot.heart_rate, None);
    }

    #[tokio::test]
    async fn test_slow_reader_sees_latest_only() {
        let channels = VitalChannels::new();
        let mut first = channels.subscribe();
        let second = channels.subscribe();

        for bpm in [70, 71, 72] {
            channels.publish_heart_rate(Some(HeartRateReading {
                bpm,
                source: HrSource::Ppg,
            }));
        }

        first.heart_rate.changed().await.unwrap();
        assert_eq!(first.heart_rate.borrow_and_update().unwrap().bpm, 72);
        assert_eq!(second.heart_rate.borrow().unwrap().bpm, 72);
    }

    #[test]
    fn test_housekeeping_fills_two_channels() {
        let channels = VitalChannels::new();
        channels.publish_housekeeping(Housekeeping {
            temperature_centi_c: 3_650,
            battery_percent: 80,
        });
        let snapshot = channels.snapshot();
        assert_eq!(snapshot.temperature_centi_c, Some(3_650));
        assert_eq!(snapshot.battery_percent, Some(80));
    }
}
