use super::bus::{BusError, Housekeeping, PpgFrame, RawFrame, SensorBus};
use super::decoder::{
    BIOZ_FIFO_SLOTS, ECG_FIFO_SLOTS, encode_bioz_slot, encode_ecg_slot, encode_ppg_word, status,
};
use bytes::{BufMut, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

const TAG_VALID: u8 = 0;
const TAG_EMPTY: u8 = 6;
const RTOR_MS_PER_COUNT: f64 = 7.8125;
const BIOZ_BASELINE: f64 = 100_000.0;
const R_WAVE: [i32; 3] = [6_000, 20_000, 6_000];

// Beat phase of the systolic upstroke and of the reflected diastolic wave.
const SYSTOLIC_CENTER: f64 = 0.15;
const SYSTOLIC_WIDTH: f64 = 0.07;
const DIASTOLIC_CENTER: f64 = 0.45;
const DIASTOLIC_WIDTH: f64 = 0.08;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// ECG samples produced per second, one per transaction.
    pub ecg_rate_hz: u32,
    pub ppg_rate_hz: u32,
    pub heart_rate_bpm: u32,
    pub breaths_per_min: u32,
    /// Red/IR perfusion ratio; 0.13 lands on 98 % in the calibration table.
    pub ppg_ratio: f64,
    pub ir_dc: i32,
    /// Depth of the systolic dip in the IR channel.
    pub ir_ac: i32,
    pub red_dc: i32,
    /// Diastolic wave height relative to the systolic one. Its trough
    /// behind the dicrotic notch is what the valley detector over-counts.
    pub dicrotic_depth: f64,
    /// Fraction by which breathing swings the diastolic wave.
    pub respiratory_modulation: f64,
    pub bioz_amplitude: i32,
    /// Uniform noise amplitude added to every channel.
    pub noise: i32,
    /// Probability that a transaction fails.
    pub failure_rate: f64,
    pub seed: u64,
    /// Electrodes and optode in contact with the skin.
    pub contact: bool,
    pub temperature_centi_c: i16,
    pub battery_percent: u8,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            ecg_rate_hz: 128,
            ppg_rate_hz: 128,
            heart_rate_bpm: 75,
            breaths_per_min: 15,
            ppg_ratio: 0.13,
            ir_dc: 7_000,
            ir_ac: 600,
            red_dc: 5_000,
            dicrotic_depth: 0.475,
            respiratory_modulation: 0.425,
            bioz_amplitude: 3_000,
            noise: 0,
            failure_rate: 0.0,
            seed: 0x5EED,
            contact: true,
            temperature_centi_c: 3_650,
            battery_percent: 87,
        }
    }
}

/// Deterministic stand-in for the ECG/BioZ and PPG front-ends.
///
/// Produces one ECG sample per transaction, a BioZ sample on every other
/// transaction, and one PPG reading per PPG transaction. The optical pulse
/// carries a dicrotic notch whose depth follows respiration, so the notch
/// trough clears the valley threshold on four beats out of five at the
/// default 75 bpm and 15 breaths/min.
pub struct SyntheticBus {
    config: SyntheticConfig,
    rng: StdRng,
    ecg_index: u64,
    ppg_index: u64,
    last_beat: Option<u64>,
}

impl SyntheticBus {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config: SyntheticConfig {
                failure_rate: config.failure_rate.clamp(0.0, 1.0),
                ..config
            },
            rng,
            ecg_index: 0,
            ppg_index: 0,
            last_beat: None,
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    fn maybe_fail(&mut self, device: &str) -> Result<(), BusError> {
        if self.config.failure_rate > 0.0 && self.rng.random_bool(self.config.failure_rate) {
            return Err(BusError::NotResponding {
                device: device.to_string(),
            });
        }
        Ok(())
    }

    fn noise(&mut self) -> i32 {
        match self.config.noise {
            0 => 0,
            n => {
                let n = n.abs();
                self.rng.random_range(-n..=n)
            }
        }
    }

    fn samples_per_beat(&self, rate_hz: u32) -> f64 {
        f64::from(rate_hz) * 60.0 / f64::from(self.config.heart_rate_bpm.max(1))
    }

    fn ecg_sample(&mut self, index: u64) -> (i32, bool) {
        let period = self.samples_per_beat(self.config.ecg_rate_hz);
        let offset = (index as f64 % period) as usize;
        let beat_start = offset == 0;
        let value = R_WAVE.get(offset).copied().unwrap_or(0) + self.noise();
        (value, beat_start)
    }

    /// Normalised blood volume at one PPG sample, 0 at the foot of a beat.
    fn ppg_pulse(&self, index: u64) -> f64 {
        let rate = self.config.ppg_rate_hz;
        let period = self.samples_per_beat(rate);
        let phase = (index as f64 % period) / period;

        let breath_period = f64::from(rate) * 60.0 / f64::from(self.config.breaths_per_min.max(1));
        let breath = (TAU * index as f64 / breath_period).sin();
        let diastolic =
            self.config.dicrotic_depth * (1.0 + self.config.respiratory_modulation * breath);

        gaussian(phase, SYSTOLIC_CENTER, SYSTOLIC_WIDTH)
            + gaussian(phase - 1.0, SYSTOLIC_CENTER, SYSTOLIC_WIDTH)
            + diastolic * gaussian(phase, DIASTOLIC_CENTER, DIASTOLIC_WIDTH)
    }

    fn bioz_sample(&mut self, bioz_index: u64) -> i32 {
        let bioz_rate = f64::from(self.config.ecg_rate_hz) / 2.0;
        let breath_period = bioz_rate * 60.0 / f64::from(self.config.breaths_per_min.max(1));
        let phase = TAU * bioz_index as f64 / breath_period;
        let value = BIOZ_BASELINE + f64::from(self.config.bioz_amplitude) * phase.sin();
        value as i32 + self.noise()
    }
}

fn gaussian(x: f64, center: f64, width: f64) -> f64 {
    let d = x - center;
    (-d * d / (2.0 * width * width)).exp()
}

impl SensorBus for SyntheticBus {
    fn read_ecg_bioz(&mut self) -> Result<RawFrame, BusError> {
        self.maybe_fail("ecg/bioz")?;

        let index = self.ecg_index;
        self.ecg_index += 1;

        let mut status_word = status::EINT;
        if !self.config.contact {
            status_word |= status::DCLOFFINT | status::BCGMON;
        }

        let (ecg, beat_start) = self.ecg_sample(index);
        let mut ecg_fifo = BytesMut::with_capacity(ECG_FIFO_SLOTS * 3);
        ecg_fifo.put_slice(&encode_ecg_slot(ecg, TAG_VALID));
        ecg_fifo.put_slice(&encode_ecg_slot(0, TAG_EMPTY));

        let mut bioz_fifo = BytesMut::with_capacity(BIOZ_FIFO_SLOTS * 3);
        if index % 2 == 0 {
            status_word |= status::BINT;
            let bioz = self.bioz_sample(index / 2);
            bioz_fifo.put_slice(&encode_bioz_slot(bioz, TAG_VALID));
        }
        bioz_fifo.put_slice(&encode_bioz_slot(0, TAG_EMPTY));

        let mut rtor = None;
        if beat_start && self.config.contact {
            if let Some(previous) = self.last_beat {
                let rr_ms = (index - previous) as f64 * 1000.0 / f64::from(self.config.ecg_rate_hz);
                status_word |= status::RRINT;
                rtor = Some(((rr_ms / RTOR_MS_PER_COUNT) as u32) << 10);
            }
            self.last_beat = Some(index);
        }

        Ok(RawFrame {
            status: status_word,
            ecg_fifo: ecg_fifo.freeze(),
            bioz_fifo: bioz_fifo.freeze(),
            rtor,
        })
    }

    fn read_ppg(&mut self) -> Result<PpgFrame, BusError> {
        self.maybe_fail("ppg")?;

        let index = self.ppg_index;
        self.ppg_index += 1;

        if !self.config.contact {
            let ambient = 200 + self.noise();
            return Ok(PpgFrame {
                led1: encode_ppg_word(ambient),
                led2: encode_ppg_word(ambient),
            });
        }

        let pulse = self.ppg_pulse(index);
        let ir_ac = f64::from(self.config.ir_ac);
        let red_ac = self.config.ppg_ratio * ir_ac / f64::from(self.config.ir_dc.max(1))
            * f64::from(self.config.red_dc);

        // Blood volume absorbs light, so the pulse pulls both channels down
        let ir = self.config.ir_dc + (-ir_ac * pulse) as i32 + self.noise();
        let red = self.config.red_dc + (-red_ac * pulse) as i32 + self.noise();

        Ok(PpgFrame {
            led1: encode_ppg_word(ir),
            led2: encode_ppg_word(red),
        })
    }

    fn reset_fifo(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    fn read_housekeeping(&mut self) -> Result<Housekeeping, BusError> {
        Ok(Housekeeping {
            temperature_centi_c: self.config.temperature_centi_c,
            battery_percent: self.config.battery_percent,
        })
    }
}
