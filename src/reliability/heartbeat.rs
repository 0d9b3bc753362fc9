use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tasks whose liveness the housekeeping loop cross-checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskKind {
    Acquisition,
    Consumer,
    Display,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Acquisition, TaskKind::Consumer, TaskKind::Display];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Acquisition => "acquisition",
            TaskKind::Consumer => "consumer",
            TaskKind::Display => "display",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last-beat timestamps, one lock-free slot per task.
///
/// Each slot stores milliseconds since the registry was created, plus one so
/// zero can mean "never". A task that has never beaten ages from creation.
#[derive(Debug)]
pub struct HeartbeatRegistry {
    origin: Instant,
    beats: [AtomicU64; 3],
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        Self::with_origin(Instant::now())
    }

    pub fn with_origin(origin: Instant) -> Self {
        Self {
            origin,
            beats: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
        }
    }

    pub fn beat(&self, task: TaskKind) {
        self.beat_at(task, Instant::now());
    }

    pub fn beat_at(&self, task: TaskKind, at: Instant) {
        let millis = at.saturating_duration_since(self.origin).as_millis() as u64;
        self.beats[task.slot()].store(millis + 1, Ordering::Relaxed);
    }

    pub fn last_beat(&self, task: TaskKind) -> Option<Instant> {
        match self.beats[task.slot()].load(Ordering::Relaxed) {
            0 => None,
            stamp => Some(self.origin + Duration::from_millis(stamp - 1)),
        }
    }

    pub fn age(&self, task: TaskKind, now: Instant) -> Duration {
        let since = self.last_beat(task).unwrap_or(self.origin);
        now.saturating_duration_since(since)
    }

    /// Tasks whose last beat is older than `timeout`.
    pub fn stale_tasks(&self, now: Instant, timeout: Duration) -> Vec<TaskKind> {
        TaskKind::ALL
            .into_iter()
            .filter(|&task| self.age(task, now) > timeout)
            .collect()
    }
}

impl Default for HeartbeatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
