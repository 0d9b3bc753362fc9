use std::sync::Arc;
use std::time::{Duration, Instant};
use vitals_core::acquisition::AcquisitionStats;
use vitals_core::reliability::{
    ComponentHealth, HealthConfig, HealthMonitor, HealthReport, HealthStatus, HeartbeatRegistry,
    Housekeeper, HousekeepingConfig, STREAM_SINK_COMPONENT, SoftwareWatchdog, TaskKind,
};
use vitals_core::stream::DrainStats;

#[tokio::test]
async fn test_health_status_aggregation() {
    let monitor = HealthMonitor::new(HealthConfig::default());

    monitor
        .update_component_health("acquisition", ComponentHealth::Healthy)
        .await;
    monitor
        .update_component_health("consumer", ComponentHealth::Healthy)
        .await;
    assert_eq!(monitor.get_overall_health().await, HealthStatus::Healthy);

    monitor
        .update_component_health(
            "display",
            ComponentHealth::Degraded("refresh slow".to_string()),
        )
        .await;
    assert_eq!(monitor.get_overall_health().await, HealthStatus::Degraded);

    monitor
        .update_component_health(
            "consumer",
            ComponentHealth::Unhealthy("no heartbeat".to_string()),
        )
        .await;
    assert_eq!(monitor.get_overall_health().await, HealthStatus::Unhealthy);

    let report = HealthReport::generate(&monitor, Instant::now()).await;
    assert_eq!(report.overall_status, HealthStatus::Unhealthy);
    assert_eq!(report.components.len(), 3);
    assert!(serde_json::to_string(&report).unwrap().contains("Unhealthy"));
}

#[tokio::test]
async fn test_housekeeping_feeds_software_watchdog() {
    let watchdog = Arc::new(SoftwareWatchdog::new(Duration::from_secs(3)));
    let heartbeats = Arc::new(HeartbeatRegistry::new());
    let health = Arc::new(HealthMonitor::default());
    let mut housekeeper = Housekeeper::new(
        HousekeepingConfig::default(),
        watchdog.clone(),
        heartbeats.clone(),
        health.clone(),
    )
    .with_acquisition_stats(Arc::new(AcquisitionStats::default()))
    .with_drain_stats(Arc::new(DrainStats::default()));

    for task in TaskKind::ALL {
        heartbeats.beat(task);
    }
    let stale = housekeeper.tick(Instant::now()).await;
    assert!(stale.is_empty());
    assert_eq!(watchdog.feeds(), 1);
    assert!(!watchdog.check(Instant::now()));
    assert_eq!(
        health.get_component_health(STREAM_SINK_COMPONENT).await,
        ComponentHealth::Healthy
    );

    // Nobody feeds it for longer than the timeout
    assert!(watchdog.check(Instant::now() + Duration::from_secs(4)));
    assert!(watchdog.is_expired());
    housekeeper.tick(Instant::now()).await;
    assert!(!watchdog.is_expired());
}

#[tokio::test]
async fn test_every_stale_task_reported() {
    let origin = Instant::now();
    let heartbeats = Arc::new(HeartbeatRegistry::with_origin(origin));
    let health = Arc::new(HealthMonitor::default());
    let mut housekeeper = Housekeeper::new(
        HousekeepingConfig {
            stale_after: Duration::from_secs(2),
            ..HousekeepingConfig::default()
        },
        Arc::new(SoftwareWatchdog::new(Duration::from_secs(3))),
        heartbeats,
        health.clone(),
    );

    let stale = housekeeper.tick(origin + Duration::from_secs(5)).await;
    assert_eq!(stale.len(), TaskKind::ALL.len());
    for task in TaskKind::ALL {
        assert!(matches!(
            health.get_component_health(task.as_str()).await,
            ComponentHealth::Unhealthy(_)
        ));
    }
}

#[tokio::test]
async fn test_watchdog_monitor_stops_on_cancel() {
    let watchdog = Arc::new(SoftwareWatchdog::new(Duration::from_millis(50)));
    let token = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn(
        watchdog
            .clone()
            .monitor(Duration::from_millis(10), token.clone()),
    );

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(watchdog.is_expired());

    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
