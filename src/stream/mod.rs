//! Host-facing serial stream: packet framing and the drain path out of the
//! stream ring buffer.

pub mod drain;
pub mod error;
pub mod framing;

pub use drain::{DrainConfig, DrainSnapshot, DrainStats, StreamDrain, check_stall, run_stall_watchdog};
pub use error::StreamError;
pub use framing::{
    PacketType, SAMPLES_PER_PACKET, StreamEncoder, StreamFormat, StreamVitals, ecg_bioz_packet,
    legacy_packet, parse_packet, ppg_packet,
};
