pub mod metrics;
pub mod queue;
pub mod ring;

pub use metrics::{QueueMetrics, RingMetrics};
pub use queue::{
    EnqueueOutcome, QueueConsumer, QueueError, QueueProducer, SampleConsumer, SampleProducer,
    bounded,
};
pub use ring::{StreamRingBuffer, WriteOutcome};
