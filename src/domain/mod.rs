//! Domain layer for vitals-core.
//!
//! Contains the canonical types shared across all modules:
//! - `SensorSample`: one fused reading moving from acquisition to the consumer
//! - `HrSource`: which front-end drives the published heart rate
//! - `PipelineError`: Top-level error type

pub mod error;
pub mod sample;

pub use error::PipelineError;
pub use sample::{HrSource, INVALID_READING, SensorSample};
