//! Sensor acquisition: bus transactions, FIFO decoding and the periodic
//! scheduler that turns bursts into fused samples.

pub mod bus;
pub mod decoder;
pub mod rate_limit;
pub mod scheduler;
pub mod synthetic;

pub use bus::{BusError, Housekeeping, PpgFrame, RawFrame, SensorBus};
pub use decoder::{DecodeError, DecodedBurst, FrameDecoder, PpgReading};
pub use rate_limit::RateLimitedLog;
pub use scheduler::{
    AcquisitionScheduler, AcquisitionSnapshot, AcquisitionStats, SchedulerConfig, TickOutcome,
};
pub use synthetic::{SyntheticBus, SyntheticConfig};
