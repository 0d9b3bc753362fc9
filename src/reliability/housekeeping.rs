//! The 1 Hz housekeeping loop: feeds the watchdog, cross-checks task
//! heartbeats and turns pipeline counters into component health.

use super::health::{ComponentHealth, HealthMonitor};
use super::heartbeat::{HeartbeatRegistry, TaskKind};
use super::watchdog::HardwareWatchdog;
use crate::acquisition::{AcquisitionSnapshot, AcquisitionStats};
use crate::stream::{DrainSnapshot, DrainStats};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const SENSOR_BUS_COMPONENT: &str = "sensor_bus";
pub const STREAM_SINK_COMPONENT: &str = "stream_sink";

#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    pub period: Duration,
    /// A task whose last heartbeat is older than this is reported stale.
    pub stale_after: Duration,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            stale_after: Duration::from_secs(10),
        }
    }
}

pub struct Housekeeper<W: HardwareWatchdog> {
    config: HousekeepingConfig,
    watchdog: W,
    heartbeats: Arc<HeartbeatRegistry>,
    health: Arc<HealthMonitor>,
    acquisition: Option<Arc<AcquisitionStats>>,
    drain: Option<Arc<DrainStats>>,
    last_acquisition: AcquisitionSnapshot,
    last_drain: DrainSnapshot,
}

impl<W: HardwareWatchdog> Housekeeper<W> {
    pub fn new(
        config: HousekeepingConfig,
        watchdog: W,
        heartbeats: Arc<HeartbeatRegistry>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            config,
            watchdog,
            heartbeats,
            health,
            acquisition: None,
            drain: None,
            last_acquisition: AcquisitionSnapshot::default(),
            last_drain: DrainSnapshot::default(),
        }
    }

    pub fn with_acquisition_stats(mut self, stats: Arc<AcquisitionStats>) -> Self {
        self.acquisition = Some(stats);
        self
    }

    pub fn with_drain_stats(mut self, stats: Arc<DrainStats>) -> Self {
        self.drain = Some(stats);
        self
    }

    /// One housekeeping pass; returns the tasks found stale.
    pub async fn tick(&mut self, now: Instant) -> Vec<TaskKind> {
        self.watchdog.feed();

        let stale = self.heartbeats.stale_tasks(now, self.config.stale_after);
        for task in TaskKind::ALL {
            let health = if stale.contains(&task) {
                let age_ms = self.heartbeats.age(task, now).as_millis() as u64;
                match task {
                    TaskKind::Acquisition => {
                        error!(age_ms, "Acquisition task heartbeat stale: sensor sampling stopped");
                    }
                    TaskKind::Consumer => {
                        error!(age_ms, "Consumer task heartbeat stale: vitals no longer updated");
                    }
                    TaskKind::Display => {
                        error!(age_ms, "Display task heartbeat stale: screen refresh stopped");
                    }
                }
                ComponentHealth::Unhealthy(format!("no heartbeat for {age_ms} ms"))
            } else {
                ComponentHealth::Healthy
            };
            self.health.update_component_health(task.as_str(), health).await;
        }

        if let Some(stats) = &self.acquisition {
            let current = stats.snapshot();
            let ticks = current.ticks.saturating_sub(self.last_acquisition.ticks);
            let errors = current.bus_errors.saturating_sub(self.last_acquisition.bus_errors);
            // More failed transactions than good ones this period counts as a failed check
            let ok = ticks > 0 && errors * 2 <= ticks;
            self.last_acquisition = current;
            self.health.record_health_check(SENSOR_BUS_COMPONENT, ok).await;
        }

        if let Some(stats) = &self.drain {
            let current = stats.snapshot();
            let ok = current.write_errors == self.last_drain.write_errors;
            self.last_drain = current;
            self.health.record_health_check(STREAM_SINK_COMPONENT, ok).await;
        }

        stale
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            period_ms = self.config.period.as_millis() as u64,
            stale_after_s = self.config.stale_after.as_secs(),
            "Housekeeping started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(Instant::now()).await;
                }
            }
        }

        info!("Housekeeping stopped");
    }
}
