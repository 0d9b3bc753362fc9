//! Liveness and health of the running pipeline: per-task heartbeats, the
//! watchdog, component health and the housekeeping loop tying them together.

pub mod health;
pub mod heartbeat;
pub mod housekeeping;
pub mod watchdog;

pub use health::{ComponentHealth, HealthConfig, HealthMonitor, HealthReport, HealthStatus};
pub use heartbeat::{HeartbeatRegistry, TaskKind};
pub use housekeeping::{
    Housekeeper, HousekeepingConfig, SENSOR_BUS_COMPONENT, STREAM_SINK_COMPONENT,
};
pub use watchdog::{HardwareWatchdog, SoftwareWatchdog};
