//! Host-facing serial packet framing.
//!
//! Every packet is `[0x0A, 0xFA, LEN_LO, LEN_HI, TYPE]`, `LEN` payload
//! bytes, then `[0x00, 0x0B]`. Multi-byte payload fields are little-endian.

use super::error::StreamError;
use crate::domain::SensorSample;
use bytes::{BufMut, Bytes, BytesMut};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const START: [u8; 2] = [0x0A, 0xFA];
pub const STOP: [u8; 2] = [0x00, 0x0B];
pub const HEADER_LEN: usize = 5;
pub const OVERHEAD: usize = HEADER_LEN + STOP.len();

/// Sample pairs (or IR samples) batched into one split-format packet.
pub const SAMPLES_PER_PACKET: usize = 8;
pub const LEGACY_PAYLOAD_LEN: usize = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// One fused sample with every vital attached.
    Legacy = 0x02,
    EcgBioz = 0x03,
    Ppg = 0x04,
}

impl TryFrom<u8> for PacketType {
    type Error = StreamError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x02 => Ok(PacketType::Legacy),
            0x03 => Ok(PacketType::EcgBioz),
            0x04 => Ok(PacketType::Ppg),
            other => Err(StreamError::UnknownPacketType(other)),
        }
    }
}

/// Which packet layout the consumer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// Separate batched ECG/BioZ and PPG packets
    #[default]
    Split,
    /// One combined packet per sample
    Legacy,
}

/// Slow-changing values appended to stream packets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamVitals {
    pub heart_rate: u8,
    pub respiration: u8,
    pub spo2: u8,
    pub temperature_centi_c: i16,
}

fn frame(packet_type: PacketType, payload_len: usize, fill: impl FnOnce(&mut BytesMut)) -> Bytes {
    let mut buf = BytesMut::with_capacity(OVERHEAD + payload_len);
    buf.put_slice(&START);
    buf.put_u16_le(payload_len as u16);
    buf.put_u8(packet_type as u8);
    fill(&mut buf);
    debug_assert_eq!(buf.len(), HEADER_LEN + payload_len);
    buf.put_slice(&STOP);
    buf.freeze()
}

/// ECG and BioZ as interleaved i32 pairs, then heart rate and respiration rate.
pub fn ecg_bioz_packet(pairs: &[(i32, i32)], vitals: StreamVitals) -> Bytes {
    let len = pairs.len() * 8 + 2;
    frame(PacketType::EcgBioz, len, |buf| {
        for &(ecg, bioz) in pairs {
            buf.put_i32_le(ecg);
            buf.put_i32_le(bioz);
        }
        buf.put_u8(vitals.heart_rate);
        buf.put_u8(vitals.respiration);
    })
}

/// IR samples truncated to i16, then SpO2 and temperature.
pub fn ppg_packet(ir: &[i32], vitals: StreamVitals) -> Bytes {
    let len = ir.len() * 2 + 3;
    frame(PacketType::Ppg, len, |buf| {
        for &sample in ir {
            buf.put_i16_le(sample as i16);
        }
        buf.put_u8(vitals.spo2);
        buf.put_i16_le(vitals.temperature_centi_c);
    })
}

pub fn legacy_packet(sample: &SensorSample, bioz_skip: bool, vitals: StreamVitals) -> Bytes {
    frame(PacketType::Legacy, LEGACY_PAYLOAD_LEN, |buf| {
        buf.put_i32_le(sample.ecg);
        buf.put_i32_le(sample.bioz);
        buf.put_u8(if bioz_skip { 0xFF } else { 0x00 });
        buf.put_i32_le(sample.ppg_red);
        buf.put_i32_le(sample.ppg_ir);
        buf.put_i16_le(vitals.temperature_centi_c);
        buf.put_u8(vitals.spo2);
        buf.put_u8(vitals.heart_rate);
        buf.put_u8(vitals.respiration);
    })
}

/// Splits the first complete packet off the front of `buf`.
///
/// Returns `Ok(None)` while the packet is still incomplete.
pub fn parse_packet(buf: &[u8]) -> Result<Option<(PacketType, &[u8], usize)>, StreamError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    if buf[..2] != START {
        return Err(StreamError::BadStart([buf[0], buf[1]]));
    }

    let len = usize::from(u16::from_le_bytes([buf[2], buf[3]]));
    let packet_type = PacketType::try_from(buf[4])?;
    let total = len + OVERHEAD;
    if buf.len() < total {
        return Ok(None);
    }
    if buf[HEADER_LEN + len..total] != STOP {
        return Err(StreamError::BadStop);
    }

    Ok(Some((packet_type, &buf[HEADER_LEN..HEADER_LEN + len], total)))
}

/// Batches fused samples into packets in the configured format.
#[derive(Debug)]
pub struct StreamEncoder {
    format: StreamFormat,
    batch: usize,
    pairs: Vec<(i32, i32)>,
    ir: Vec<i32>,
    last_bioz: Option<i32>,
}

impl StreamEncoder {
    pub fn new(format: StreamFormat, batch: usize) -> Self {
        let batch = batch.clamp(1, SAMPLES_PER_PACKET * 8);
        Self {
            format,
            batch,
            pairs: Vec::with_capacity(batch),
            ir: Vec::with_capacity(batch),
            last_bioz: None,
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Adds one sample and appends any completed packets to `out`.
    pub fn push(&mut self, sample: &SensorSample, vitals: StreamVitals, out: &mut Vec<Bytes>) {
        match self.format {
            StreamFormat::Legacy => {
                // BioZ arrives at half the ECG rate; repeats are flagged for the host
                let skip = self.last_bioz == Some(sample.bioz);
                self.last_bioz = Some(sample.bioz);
                out.push(legacy_packet(sample, skip, vitals));
            }
            StreamFormat::Split => {
                self.pairs.push((sample.ecg, sample.bioz));
                self.ir.push(sample.ppg_ir);
                if self.pairs.len() == self.batch {
                    out.push(ecg_bioz_packet(&self.pairs, vitals));
                    out.push(ppg_packet(&self.ir, vitals));
                    self.pairs.clear();
                    self.ir.clear();
                }
            }
        }
    }
}
