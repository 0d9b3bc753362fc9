use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComponentHealth {
    Healthy,
    Degraded(String),  // reason
    Unhealthy(String), // reason
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub unhealthy_threshold: u32,
    pub recovery_threshold: u32,
    /// Check results kept per component.
    pub history_len: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3, // 3 consecutive failed seconds = unhealthy
            recovery_threshold: 2,  // 2 consecutive good seconds = recovered
            history_len: 60,
        }
    }
}

#[derive(Debug)]
struct ComponentState {
    health: ComponentHealth,
    recent_checks: VecDeque<bool>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_check: Option<Instant>,
}

impl ComponentState {
    fn new(history_len: usize) -> Self {
        Self {
            health: ComponentHealth::Healthy,
            recent_checks: VecDeque::with_capacity(history_len),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check: None,
        }
    }
}

/// Per-component health of the running pipeline.
///
/// Components are either set directly (heartbeat verdicts) or derived from
/// a run of pass/fail checks (sensor bus, stream sink).
pub struct HealthMonitor {
    config: HealthConfig,
    components: RwLock<HashMap<String, ComponentState>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            components: RwLock::new(HashMap::new()),
        }
    }

    pub async fn update_component_health(&self, component: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        let state = components
            .entry(component.to_string())
            .or_insert_with(|| ComponentState::new(self.config.history_len));

        if state.health != health {
            tracing::debug!(component, from = ?state.health, to = ?health, "Component health set");
        }
        state.health = health;
        state.last_check = Some(Instant::now());
    }

    pub async fn record_health_check(&self, component: &str, success: bool) {
        let mut components = self.components.write().await;
        let state = components
            .entry(component.to_string())
            .or_insert_with(|| ComponentState::new(self.config.history_len));

        state.recent_checks.push_back(success);
        if state.recent_checks.len() > self.config.history_len {
            state.recent_checks.pop_front();
        }
        state.last_check = Some(Instant::now());

        if success {
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
        }

        let new_health = if state.consecutive_failures >= self.config.unhealthy_threshold {
            ComponentHealth::Unhealthy(format!(
                "{} consecutive failed checks",
                state.consecutive_failures
            ))
        } else if state.consecutive_failures > 0 {
            ComponentHealth::Degraded("recent check failed".to_string())
        } else if state.consecutive_successes >= self.config.recovery_threshold
            || matches!(state.health, ComponentHealth::Healthy)
        {
            ComponentHealth::Healthy
        } else {
            state.health.clone()
        };

        if new_health != state.health {
            tracing::info!(
                component,
                from = ?state.health,
                to = ?new_health,
                "Component health changed"
            );
            state.health = new_health;
        }
    }

    pub async fn get_overall_health(&self) -> HealthStatus {
        let components = self.components.read().await;

        if components.is_empty() {
            return HealthStatus::Unhealthy;
        }

        let mut has_unhealthy = false;
        let mut has_degraded = false;

        for state in components.values() {
            match &state.health {
                ComponentHealth::Unhealthy(_) => has_unhealthy = true,
                ComponentHealth::Degraded(_) => has_degraded = true,
                ComponentHealth::Healthy => {}
            }
        }

        if has_unhealthy {
            HealthStatus::Unhealthy
        } else if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub async fn get_component_health(&self, component: &str) -> ComponentHealth {
        let components = self.components.read().await;
        components
            .get(component)
            .map(|state| state.health.clone())
            .unwrap_or(ComponentHealth::Unhealthy("Component not found".to_string()))
    }

    pub async fn get_component_history(&self, component: &str) -> Vec<bool> {
        let components = self.components.read().await;
        components
            .get(component)
            .map(|state| state.recent_checks.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn get_all_component_status(&self) -> HashMap<String, ComponentHealth> {
        let components = self.components.read().await;
        components
            .iter()
            .map(|(name, state)| (name.clone(), state.health.clone()))
            .collect()
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub timestamp: String,
    pub uptime: Duration,
}

impl HealthReport {
    pub async fn generate(monitor: &HealthMonitor, start_time: Instant) -> Self {
        Self {
            overall_status: monitor.get_overall_health().await,
            components: monitor.get_all_component_status().await,
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime: start_time.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_monitor_is_unhealthy() {
        let monitor = HealthMonitor::default();
        assert_eq!(monitor.get_overall_health().await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_consecutive_failures_escalate_then_recover() {
        let monitor = HealthMonitor::default();
        monitor.record_health_check("sensor_bus", true).await;
        assert_eq!(monitor.get_overall_health().await, HealthStatus::Healthy);

        monitor.record_health_check("sensor_bus", false).await;
        assert!(matches!(
            monitor.get_component_health("sensor_bus").await,
            ComponentHealth::Degraded(_)
        ));

        monitor.record_health_check("sensor_bus", false).await;
        monitor.record_health_check("sensor_bus", false).await;
        assert_eq!(monitor.get_overall_health().await, HealthStatus::Unhealthy);

        monitor.record_health_check("sensor_bus", true).await;
        assert!(matches!(
            monitor.get_component_health("sensor_bus").await,
            ComponentHealth::Unhealthy(_)
        ));
        monitor.record_health_check("sensor_bus", true).await;
        assert_eq!(
            monitor.get_component_health("sensor_bus").await,
            ComponentHealth::Healthy
        );
        assert_eq!(
            monitor.get_component_history("sensor_bus").await,
            vec![true, false, false, false, true, true]
        );
    }

    #[tokio::test]
    async fn test_direct_update_and_report() {
        let monitor = HealthMonitor::default();
        monitor
            .update_component_health("consumer", ComponentHealth::Healthy)
            .await;
        monitor
            .update_component_health("display", ComponentHealth::Degraded("slow".into()))
            .await;

        let report = HealthReport::generate(&monitor, Instant::now()).await;
        assert_eq!(report.overall_status, HealthStatus::Degraded);
        assert_eq!(report.components.len(), 2);
        assert!(!report.timestamp.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_component() {
        let monitor = HealthMonitor::default();
        assert!(matches!(
            monitor.get_component_health("missing").await,
            ComponentHealth::Unhealthy(_)
        ));
    }
}
