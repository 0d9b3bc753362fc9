//! Frame decoding for the ECG/BioZ and PPG front-ends.
//!
//! Every FIFO slot is three bytes, MSB first, carrying a small tag next to the
//! payload. Slots are walked in order and only ever surfaced when the tag
//! marks them valid; the first "empty" tag ends the burst and an "overflow"
//! tag ends it and requests a hardware FIFO reset.

use super::bus::{PpgFrame, RawFrame};
use super::rate_limit::RateLimitedLog;
use thiserror::Error;
use tracing::{debug, warn};

pub const SLOT_BYTES: usize = 3;
/// ECG slots read per transaction; gives headroom for scheduling delays.
pub const ECG_FIFO_SLOTS: usize = 8;
/// BioZ runs at half the ECG rate.
pub const BIOZ_FIFO_SLOTS: usize = 4;

/// Status register bits of the ECG/BioZ front-end.
pub mod status {
    pub const EINT: u32 = 0x80_0000;
    pub const EOVF: u32 = 0x40_0000;
    pub const DCLOFFINT: u32 = 0x10_0000;
    pub const BINT: u32 = 0x08_0000;
    pub const BOVF: u32 = 0x04_0000;
    pub const BOVER: u32 = 0x02_0000;
    pub const BUNDR: u32 = 0x01_0000;
    pub const BCGMON: u32 = 0x00_8000;
    pub const RRINT: u32 = 0x00_0400;

    pub const BIOZ_LEAD_MASK: u32 = BOVER | BUNDR | BCGMON;
}

/// Resolution of the R-to-R register, milliseconds per count.
const RTOR_MS_PER_COUNT: f32 = 7.8125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTag {
    Valid,
    FastRecovery,
    Empty,
    Overflow,
    Unexpected(u8),
}

impl SlotTag {
    pub fn ecg(b2: u8) -> Self {
        match (b2 & 0x38) >> 3 {
            0 | 2 => SlotTag::Valid,
            1 => SlotTag::FastRecovery,
            6 => SlotTag::Empty,
            7 => SlotTag::Overflow,
            other => SlotTag::Unexpected(other),
        }
    }

    pub fn bioz(b2: u8) -> Self {
        match b2 & 0x07 {
            0 | 2 => SlotTag::Valid,
            6 => SlotTag::Empty,
            7 => SlotTag::Overflow,
            other => SlotTag::Unexpected(other),
        }
    }

    pub fn carries_sample(self) -> bool {
        matches!(self, SlotTag::Valid | SlotTag::FastRecovery)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{fifo} FIFO overflow")]
    Overflow { fifo: FifoKind },
    #[error("{fifo} FIFO returned unexpected tag {tag:#x}")]
    UnexpectedTag { fifo: FifoKind, tag: u8 },
}

impl DecodeError {
    pub fn requires_fifo_reset(&self) -> bool {
        matches!(self, DecodeError::Overflow { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoKind {
    Ecg,
    Bioz,
}

impl std::fmt::Display for FifoKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FifoKind::Ecg => f.write_str("ECG"),
            FifoKind::Bioz => f.write_str("BioZ"),
        }
    }
}

/// Valid samples from one FIFO plus the reason the walk stopped early, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FifoRead {
    pub samples: Vec<i32>,
    pub fault: Option<DecodeError>,
}

fn decode_fifo(
    bytes: &[u8],
    fifo: FifoKind,
    tag_of: fn(u8) -> SlotTag,
    value_of: fn(&[u8]) -> i32,
) -> FifoRead {
    let mut read = FifoRead {
        samples: Vec::with_capacity(bytes.len() / SLOT_BYTES),
        fault: None,
    };

    for slot in bytes.chunks_exact(SLOT_BYTES) {
        match tag_of(slot[2]) {
            tag if tag.carries_sample() => read.samples.push(value_of(slot)),
            SlotTag::Overflow => {
                read.fault = Some(DecodeError::Overflow { fifo });
                break;
            }
            SlotTag::Unexpected(tag) => {
                read.fault = Some(DecodeError::UnexpectedTag { fifo, tag });
                break;
            }
            _ => break,
        }
    }

    read
}

/// 18-bit ECG payload, sign-extended and left-aligned by 8 bits.
fn ecg_value(slot: &[u8]) -> i32 {
    let word = (u32::from(slot[0]) << 16) | (u32::from(slot[1]) << 8) | u32::from(slot[2] & 0xC0);
    ((word << 8) as i32) >> 6
}

/// 20-bit BioZ payload, sign-extended.
fn bioz_value(slot: &[u8]) -> i32 {
    let word = ((u32::from(slot[0]) << 16) | (u32::from(slot[1]) << 8) | u32::from(slot[2])) & 0xFF_FFF0;
    ((word << 8) as i32) >> 12
}

pub fn decode_ecg_fifo(bytes: &[u8]) -> FifoRead {
    decode_fifo(bytes, FifoKind::Ecg, SlotTag::ecg, ecg_value)
}

pub fn decode_bioz_fifo(bytes: &[u8]) -> FifoRead {
    decode_fifo(bytes, FifoKind::Bioz, SlotTag::bioz, bioz_value)
}

/// Sign-extends a 22-bit PPG register word and drops its 8 noise bits.
pub fn decode_ppg_word(word: u32) -> i32 {
    ((word << 10) as i32) >> 18
}

/// Builds an ECG FIFO slot from an 18-bit sample and a raw 3-bit tag.
pub fn encode_ecg_slot(sample: i32, tag: u8) -> [u8; SLOT_BYTES] {
    let word = ((sample as u32 & 0x3_FFFF) << 6) | (u32::from(tag & 0x07) << 3);
    [(word >> 16) as u8, (word >> 8) as u8, word as u8]
}

/// Builds a BioZ FIFO slot from a 20-bit sample and a raw 3-bit tag.
pub fn encode_bioz_slot(sample: i32, tag: u8) -> [u8; SLOT_BYTES] {
    let word = ((sample as u32 & 0xF_FFFF) << 4) | u32::from(tag & 0x07);
    [(word >> 16) as u8, (word >> 8) as u8, word as u8]
}

/// Inverse of [`decode_ppg_word`] for 14-bit samples.
pub fn encode_ppg_word(sample: i32) -> u32 {
    ((sample as u32) << 8) & 0x3F_FFFF
}

/// Everything one ECG/BioZ transaction produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBurst {
    pub ecg: Vec<i32>,
    pub bioz: Vec<i32>,
    pub ecg_lead_off: bool,
    pub bioz_lead_off: bool,
    /// Last known R-R derived heart rate, bpm.
    pub heart_rate: u16,
    /// Last known R-R interval, milliseconds.
    pub rr_interval: u16,
    pub faults: Vec<DecodeError>,
    /// The status register flagged an overflow or a slot carried the overflow tag.
    pub fifo_reset: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpgReading {
    pub ir: i32,
    pub red: i32,
}

impl From<PpgFrame> for PpgReading {
    fn from(frame: PpgFrame) -> Self {
        Self {
            ir: decode_ppg_word(frame.led1),
            red: decode_ppg_word(frame.led2),
        }
    }
}

/// Stateful decoder for the ECG/BioZ device.
///
/// Holds the last good R-R values so every burst reports a heart rate even
/// when the R-R interrupt did not fire this time.
#[derive(Debug)]
pub struct FrameDecoder {
    last_hr: u16,
    last_rri: u16,
    overflow_log: RateLimitedLog,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            last_hr: 0,
            last_rri: 0,
            overflow_log: RateLimitedLog::default(),
        }
    }

    pub fn decode(&mut self, frame: &RawFrame) -> DecodedBurst {
        let status_word = frame.status;
        let mut burst = DecodedBurst {
            ecg_lead_off: status_word & status::DCLOFFINT != 0,
            bioz_lead_off: status_word & status::BIOZ_LEAD_MASK != 0,
            ..DecodedBurst::default()
        };

        if status_word & status::EINT != 0 {
            let ecg = decode_ecg_fifo(&frame.ecg_fifo);
            let bioz = decode_bioz_fifo(&frame.bioz_fifo);
            burst.ecg = ecg.samples;
            burst.bioz = bioz.samples;
            burst.faults.extend(ecg.fault);
            burst.faults.extend(bioz.fault);
        } else if status_word & status::BINT != 0 {
            let bioz = decode_bioz_fifo(&frame.bioz_fifo);
            burst.bioz = bioz.samples;
            burst.faults.extend(bioz.fault);
        }

        let status_overflow = status_word & (status::EOVF | status::BOVF) != 0;
        if status_overflow {
            if let Some(count) = self.overflow_log.record() {
                warn!(count, status = status_word, "FIFO overflow, resetting");
            }
        }
        for fault in &burst.faults {
            debug!(%fault, "FIFO walk stopped early");
        }
        burst.fifo_reset = status_overflow || burst.faults.iter().any(DecodeError::requires_fifo_reset);

        if status_word & status::RRINT != 0
            && let Some(rtor) = frame.rtor
            && rtor > 0
        {
            self.update_rr(rtor);
        }

        burst.heart_rate = self.last_hr;
        burst.rr_interval = self.last_rri;
        burst
    }

    fn update_rr(&mut self, rtor: u32) {
        let rri_ms = ((rtor >> 10) as f32 * RTOR_MS_PER_COUNT) as u16;
        if rri_ms == 0 {
            return;
        }
        self.last_rri = rri_ms;
        self.last_hr = (60_000 / u32::from(rri_ms)) as u16;
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_log.count()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
