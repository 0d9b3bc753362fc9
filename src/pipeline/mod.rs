//! Consumer side of the pipeline: estimation, gating, smoothing and the
//! latest-value channels the display and wireless layers read.

pub mod channels;
pub mod consumer;
pub mod display;
pub mod selector;
pub mod smoothing;

pub use channels::{HeartRateReading, VitalChannels, VitalReceivers, VitalSnapshot};
pub use consumer::{ConsumerConfig, ConsumerSnapshot, ConsumerStats, VitalConsumer};
pub use display::{DisplayConfig, DisplayHooks, DisplayMonitor, WaveformScreenFlag};
pub use selector::HrSourceSelector;
pub use smoothing::{SmoothOutcome, SmoothingHistory, SmoothingRing};
