use crate::acquisition::BusError;
use crate::app::{ConfigError, InitializationError, ServiceError};
use crate::buffer::QueueError;
use crate::stream::StreamError;
use thiserror::Error;

/// Top-level error type for the acquisition-to-vitals pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Initialization error: {0}")]
    Initialization(#[from] InitializationError),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] BusError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),
}

impl PipelineError {
    /// Errors the running pipeline absorbs by dropping or retrying; anything
    /// else stops startup.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Acquisition(_) | PipelineError::Stream(_)
        )
    }
}
