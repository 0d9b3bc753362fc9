use bytes::Bytes;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus transaction failed: {0}")]
    Transaction(String),
    #[error("Device not responding: {device}")]
    NotResponding { device: String },
    #[error("Bus closed")]
    Closed,
}

/// Raw burst from one ECG/BioZ transaction.
///
/// The FIFO buffers are opaque here; only the frame decoder interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    pub status: u32,
    pub ecg_fifo: Bytes,
    pub bioz_fifo: Bytes,
    /// R-to-R register, present when the device reported one.
    pub rtor: Option<u32>,
}

/// Raw LED value registers from one PPG transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PpgFrame {
    /// Infrared channel.
    pub led1: u32,
    /// Red channel.
    pub led2: u32,
}

/// Slow-changing readings sampled alongside the waveforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Housekeeping {
    /// Skin temperature in hundredths of a degree Celsius.
    pub temperature_centi_c: i16,
    pub battery_percent: u8,
}

/// Transactions the acquisition scheduler issues against the front-ends.
#[cfg_attr(test, automock)]
pub trait SensorBus: Send {
    fn read_ecg_bioz(&mut self) -> Result<RawFrame, BusError>;

    fn read_ppg(&mut self) -> Result<PpgFrame, BusError>;

    /// Flushes the ECG/BioZ FIFOs after an overflow.
    fn reset_fifo(&mut self) -> Result<(), BusError>;

    fn read_housekeeping(&mut self) -> Result<Housekeeping, BusError>;
}
