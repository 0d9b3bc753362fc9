use super::config::{Config, ConfigError, OutputTarget};
use super::initialization::InitializationError;
use super::shutdown::ShutdownHandle;
use crate::acquisition::{AcquisitionScheduler, SyntheticBus};
use crate::algorithms::VitalStats;
use crate::buffer::{QueueError, StreamRingBuffer, bounded};
use crate::pipeline::{
    DisplayMonitor, HrSourceSelector, SmoothingHistory, VitalChannels, VitalConsumer,
    WaveformScreenFlag,
};
use crate::reliability::{
    HealthMonitor, HealthReport, HeartbeatRegistry, Housekeeper, SoftwareWatchdog,
};
use crate::stream::{StreamDrain, run_stall_watchdog};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Queue error: {0}")]
    QueueError(#[from] QueueError),
    #[error("Initialization error: {0}")]
    InitializationError(#[from] InitializationError),
    #[error("Service already running")]
    AlreadyRunning,
    #[error("Shutdown timeout")]
    ShutdownTimeout,
}

type StreamSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Owns the shared pipeline state and spawns the tasks that operate on it.
pub struct ServiceManager {
    config: Config,
    start_time: Instant,

    channels: Arc<VitalChannels>,
    heartbeats: Arc<HeartbeatRegistry>,
    health: Arc<HealthMonitor>,
    selector: Arc<HrSourceSelector>,
    smoothing: Arc<SmoothingHistory>,
    vital_stats: Arc<Mutex<VitalStats>>,
    ring: Arc<StreamRingBuffer>,
    waveform: Arc<WaveformScreenFlag>,
    watchdog: Arc<SoftwareWatchdog>,

    running: bool,
}

impl ServiceManager {
    pub fn new(config: Config) -> Result<Self, ServiceError> {
        config.validate()?;

        info!(
            sampling_rate_hz = config.sampling_rate_hz,
            hr_source = %config.hr_source,
            stream_format = ?config.stream_format,
            output = ?config.output,
            "Initializing vitals pipeline"
        );

        Ok(Self {
            start_time: Instant::now(),
            channels: Arc::new(VitalChannels::new()),
            heartbeats: Arc::new(HeartbeatRegistry::new()),
            health: Arc::new(HealthMonitor::default()),
            selector: Arc::new(HrSourceSelector::new(config.hr_source)),
            smoothing: Arc::new(SmoothingHistory::new()),
            vital_stats: Arc::new(Mutex::new(VitalStats::default())),
            ring: Arc::new(StreamRingBuffer::new(config.ring_buffer_size)),
            waveform: Arc::new(WaveformScreenFlag::new(!config.waveform_hidden)),
            watchdog: Arc::new(SoftwareWatchdog::new(config.watchdog_timeout)),
            running: false,
            config,
        })
    }

    pub async fn start(&mut self) -> Result<ShutdownHandle, ServiceError> {
        if self.running {
            return Err(ServiceError::AlreadyRunning);
        }

        info!("Starting vitals pipeline tasks...");

        let (sample_tx, sample_rx) = bounded(self.config.queue_capacity)?;
        let (plot_tx, plot_rx) = bounded(self.config.plot_queue_capacity)?;
        let sink = open_sink(&self.config).await?;

        let bus = SyntheticBus::new(self.config.synthetic_config());
        let scheduler = AcquisitionScheduler::new(
            bus,
            self.config.scheduler_config(),
            sample_tx,
            self.channels.clone(),
            self.heartbeats.clone(),
        )
        .with_plot_queue(plot_tx);
        let acquisition_stats = scheduler.stats();

        let consumer = VitalConsumer::new(
            self.config.consumer_config(),
            sample_rx,
            self.channels.clone(),
            self.heartbeats.clone(),
        )
        .with_selector(self.selector.clone())
        .with_smoothing(self.smoothing.clone())
        .with_vital_stats(self.vital_stats.clone())
        .with_stream(self.ring.clone());

        let display = DisplayMonitor::new(
            self.waveform.clone(),
            self.channels.clone(),
            plot_rx,
            self.heartbeats.clone(),
            self.vital_stats.clone(),
            self.config.display_config(),
        );

        let drain_config = self.config.drain_config();
        let drain = StreamDrain::new(self.ring.clone(), sink, drain_config.clone());

        let housekeeper = Housekeeper::new(
            self.config.housekeeping_config(),
            self.watchdog.clone(),
            self.heartbeats.clone(),
            self.health.clone(),
        )
        .with_acquisition_stats(acquisition_stats)
        .with_drain_stats(drain.stats());

        let token = CancellationToken::new();
        // Consumer first so it is waiting before the first sample lands
        let tasks = vec![
            ("consumer", tokio::spawn(consumer.run(token.clone()))),
            ("acquisition", tokio::spawn(scheduler.run(token.clone()))),
            ("display", tokio::spawn(display.run(token.clone()))),
            ("stream_drain", tokio::spawn(drain.run(token.clone()))),
            (
                "stall_watchdog",
                tokio::spawn(run_stall_watchdog(
                    self.ring.clone(),
                    drain_config,
                    token.clone(),
                )),
            ),
            ("housekeeping", tokio::spawn(housekeeper.run(token.clone()))),
            (
                "watchdog",
                tokio::spawn(
                    self.watchdog
                        .clone()
                        .monitor(Duration::from_millis(500), token.clone()),
                ),
            ),
        ];

        self.running = true;
        info!(tasks = tasks.len(), "Vitals pipeline started");

        Ok(ShutdownHandle::new(token, tasks, self.config.run_duration))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn channels(&self) -> Arc<VitalChannels> {
        self.channels.clone()
    }

    pub fn selector(&self) -> Arc<HrSourceSelector> {
        self.selector.clone()
    }

    pub fn waveform_flag(&self) -> Arc<WaveformScreenFlag> {
        self.waveform.clone()
    }

    pub fn vital_stats(&self) -> Arc<Mutex<VitalStats>> {
        self.vital_stats.clone()
    }

    pub async fn get_health_report(&self) -> HealthReport {
        HealthReport::generate(&self.health, self.start_time).await
    }
}

async fn open_sink(config: &Config) -> Result<StreamSink, InitializationError> {
    match config.output {
        OutputTarget::None => Ok(Box::new(tokio::io::sink())),
        OutputTarget::Stdout => Ok(Box::new(tokio::io::stdout())),
        OutputTarget::File => {
            let path = config.output_path.clone().unwrap_or_default();
            let file = tokio::fs::File::create(&path).await.map_err(|source| {
                InitializationError::OutputOpenFailed {
                    path: path.display().to_string(),
                    source,
                }
            })?;
            Ok(Box::new(file))
        }
    }
}
