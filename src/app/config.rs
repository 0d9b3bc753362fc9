use super::initialization::LogLevel;
use crate::acquisition::{SchedulerConfig, SyntheticConfig};
use crate::algorithms::{EstimatorConfig, HrCalibration, RespirationConfig};
use crate::domain::HrSource;
use crate::pipeline::{ConsumerConfig, DisplayConfig};
use crate::reliability::HousekeepingConfig;
use crate::stream::{DrainConfig, SAMPLES_PER_PACKET, StreamFormat};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Smallest ring that still holds a few full packets of the largest layout.
const MIN_RING_BUFFER_SIZE: usize = 256;
const MAX_STREAM_BATCH: usize = 64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
}

/// Where framed stream packets are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputTarget {
    /// Packets are framed and drained but discarded.
    #[default]
    None,
    Stdout,
    File,
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Sensor transactions per second
    #[arg(long, env = "VITALS_SAMPLING_RATE_HZ", default_value = "128")]
    pub sampling_rate_hz: u32,

    /// Read the PPG front-end every N transactions
    #[arg(long, env = "VITALS_PPG_DIVIDER", default_value = "1")]
    pub ppg_divider: u32,

    /// Transactions between temperature/battery reads
    #[arg(long, env = "VITALS_HOUSEKEEPING_EVERY", default_value = "128")]
    pub housekeeping_every: u32,

    /// Capacity of the acquisition-to-consumer sample queue
    #[arg(long, env = "VITALS_QUEUE_CAPACITY", default_value = "384")]
    pub queue_capacity: usize,

    /// Capacity of the waveform plot queue
    #[arg(long, env = "VITALS_PLOT_QUEUE_CAPACITY", default_value = "256")]
    pub plot_queue_capacity: usize,

    /// Stream ring buffer size in bytes
    #[arg(long, env = "VITALS_RING_BUFFER_SIZE", default_value = "8192")]
    pub ring_buffer_size: usize,

    /// Packet layout of the output stream
    #[arg(long, env = "VITALS_STREAM_FORMAT", default_value = "split")]
    pub stream_format: StreamFormat,

    /// Samples per ECG/BioZ and PPG packet
    #[arg(long, env = "VITALS_STREAM_BATCH", default_value = "8")]
    pub stream_batch: usize,

    /// Stream output target
    #[arg(long, env = "VITALS_OUTPUT", default_value = "none")]
    pub output: OutputTarget,

    /// File receiving the stream when output=file
    #[arg(long, env = "VITALS_OUTPUT_PATH")]
    pub output_path: Option<PathBuf>,

    /// Bytes unsent for this long count as a stalled stream
    #[arg(long, env = "VITALS_DRAIN_STALL_TIMEOUT_MS", default_value = "500")]
    pub drain_stall_timeout_ms: u64,

    /// Task heartbeat age reported as stale
    #[arg(long, env = "VITALS_HEARTBEAT_TIMEOUT_SECS", default_value = "10")]
    pub heartbeat_timeout_secs: u64,

    /// Watchdog expiry when housekeeping stops feeding it
    #[arg(long, env = "VITALS_WATCHDOG_TIMEOUT_SECS", default_value = "3")]
    pub watchdog_timeout_secs: u64,

    /// Heart-rate source published to the vitals channels
    #[arg(long, env = "VITALS_HR_SOURCE", default_value = "ecg")]
    pub hr_source: HrSource,

    /// Length of one SpO2 estimation window in seconds
    #[arg(long, env = "VITALS_ESTIMATOR_WINDOW_SECS", default_value = "4")]
    pub estimator_window_secs: usize,

    #[arg(long, env = "VITALS_HR_CALIBRATION_NUM", default_value = "10")]
    pub hr_calibration_num: i32,

    #[arg(long, env = "VITALS_HR_CALIBRATION_DEN", default_value = "18")]
    pub hr_calibration_den: i32,

    /// Rate the respiration detector runs at after BioZ decimation
    #[arg(long, env = "VITALS_RESPIRATION_RATE_HZ", default_value = "32")]
    pub respiration_rate_hz: u32,

    /// Log level
    #[arg(long, env = "VITALS_LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[arg(long, env = "VITALS_LOG_JSON")]
    pub log_json: bool,

    /// Extra `target=level` filter directives
    #[arg(long = "log-directive", env = "VITALS_LOG_DIRECTIVES", value_delimiter = ',')]
    pub log_directives: Vec<String>,

    /// Stop after this many seconds instead of waiting for a signal
    #[arg(long, env = "VITALS_RUN_DURATION_SECS")]
    pub run_duration_secs: Option<u64>,

    /// Start with the waveform screen hidden
    #[arg(long, env = "VITALS_WAVEFORM_HIDDEN")]
    pub waveform_hidden: bool,

    /// Simulated heart rate
    #[arg(long, env = "VITALS_SIM_HEART_RATE", default_value = "75")]
    pub sim_heart_rate_bpm: u32,

    /// Simulated breathing rate
    #[arg(long, env = "VITALS_SIM_BREATHS_PER_MIN", default_value = "15")]
    pub sim_breaths_per_min: u32,

    /// Uniform noise amplitude on every simulated channel
    #[arg(long, env = "VITALS_SIM_NOISE", default_value = "0")]
    pub sim_noise: i32,

    /// Probability that a simulated bus transaction fails
    #[arg(long, env = "VITALS_SIM_BUS_FAILURE_RATE", default_value = "0.0")]
    pub sim_bus_failure_rate: f64,

    #[arg(long, env = "VITALS_SIM_SEED", default_value = "24301")]
    pub sim_seed: u64,

    /// Simulate electrodes and optode off the skin
    #[arg(long, env = "VITALS_SIM_PROBE_DETACHED")]
    pub sim_probe_detached: bool,

    /// Configuration file path (optional)
    #[arg(long, env = "VITALS_CONFIG_FILE")]
    #[serde(skip)]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub sample_period: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub drain_stall_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub heartbeat_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub watchdog_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub run_duration: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 128,
            ppg_divider: 1,
            housekeeping_every: 128,
            queue_capacity: 384,
            plot_queue_capacity: 256,
            ring_buffer_size: 8192,
            stream_format: StreamFormat::Split,
            stream_batch: SAMPLES_PER_PACKET,
            output: OutputTarget::None,
            output_path: None,
            drain_stall_timeout_ms: 500,
            heartbeat_timeout_secs: 10,
            watchdog_timeout_secs: 3,
            hr_source: HrSource::Ecg,
            estimator_window_secs: 4,
            hr_calibration_num: 10,
            hr_calibration_den: 18,
            respiration_rate_hz: 32,
            log_level: LogLevel::Info,
            log_json: false,
            log_directives: Vec::new(),
            run_duration_secs: None,
            waveform_hidden: false,
            sim_heart_rate_bpm: 75,
            sim_breaths_per_min: 15,
            sim_noise: 0,
            sim_bus_failure_rate: 0.0,
            sim_seed: 0x5EED,
            sim_probe_detached: false,
            config_file: None,
            sample_period: Duration::from_micros(7_812),
            drain_stall_timeout: Duration::from_millis(500),
            heartbeat_timeout: Duration::from_secs(10),
            watchdog_timeout: Duration::from_secs(3),
            run_duration: None,
        }
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::try_parse_from(args)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// CLI arguments (with their env fallbacks) layered over an optional
    /// TOML file named by `--config-file`. Values still at their CLI default
    /// take the file's value.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::try_parse_from(args)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if let Some(path) = config.config_file.clone() {
            let base = Self::read_file(&path)?;
            config.merge_defaults_from(&base);
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::read_file(path.as_ref())?;
        config.config_file = Some(path.as_ref().to_path_buf());
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn merge_defaults_from(&mut self, base: &Config) {
        let defaults = Config::default();

        macro_rules! take_if_default {
            ($($field:ident),+ $(,)?) => {
                $(
                    if self.$field == defaults.$field && base.$field != defaults.$field {
                        self.$field = base.$field.clone();
                    }
                )+
            };
        }

        take_if_default!(
            sampling_rate_hz,
            ppg_divider,
            housekeeping_every,
            queue_capacity,
            plot_queue_capacity,
            ring_buffer_size,
            stream_format,
            stream_batch,
            output,
            output_path,
            drain_stall_timeout_ms,
            heartbeat_timeout_secs,
            watchdog_timeout_secs,
            hr_source,
            estimator_window_secs,
            hr_calibration_num,
            hr_calibration_den,
            respiration_rate_hz,
            log_level,
            log_json,
            log_directives,
            run_duration_secs,
            waveform_hidden,
            sim_heart_rate_bpm,
            sim_breaths_per_min,
            sim_noise,
            sim_bus_failure_rate,
            sim_seed,
            sim_probe_detached,
        );
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        if self.sampling_rate_hz == 0 {
            return Err(ConfigError::InvalidConfig(
                "sampling_rate_hz must be greater than 0".to_string(),
            ));
        }
        self.sample_period = Duration::from_micros(1_000_000 / u64::from(self.sampling_rate_hz));
        self.drain_stall_timeout = Duration::from_millis(self.drain_stall_timeout_ms);
        self.heartbeat_timeout = Duration::from_secs(self.heartbeat_timeout_secs);
        self.watchdog_timeout = Duration::from_secs(self.watchdog_timeout_secs);
        self.run_duration = self.run_duration_secs.map(Duration::from_secs);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sampling_rate_hz > 1000 {
            return Err(ConfigError::InvalidConfig(format!(
                "sampling_rate_hz must be at most 1000, got {}",
                self.sampling_rate_hz
            )));
        }
        if self.ppg_divider == 0 || self.housekeeping_every == 0 {
            return Err(ConfigError::InvalidConfig(
                "ppg_divider and housekeeping_every must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 || self.plot_queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "Queue capacities must be greater than 0".to_string(),
            ));
        }
        if self.ring_buffer_size < MIN_RING_BUFFER_SIZE {
            return Err(ConfigError::InvalidConfig(format!(
                "ring_buffer_size must be at least {MIN_RING_BUFFER_SIZE} bytes"
            )));
        }
        if self.stream_batch == 0 || self.stream_batch > MAX_STREAM_BATCH {
            return Err(ConfigError::InvalidConfig(format!(
                "stream_batch must be between 1 and {MAX_STREAM_BATCH}"
            )));
        }
        if self.output == OutputTarget::File && self.output_path.is_none() {
            return Err(ConfigError::InvalidConfig(
                "output=file requires output_path".to_string(),
            ));
        }
        if self.drain_stall_timeout_ms == 0
            || self.heartbeat_timeout_secs == 0
            || self.watchdog_timeout_secs == 0
        {
            return Err(ConfigError::InvalidConfig(
                "Timeouts must be greater than 0".to_string(),
            ));
        }
        if self.estimator_window_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "estimator_window_secs must be greater than 0".to_string(),
            ));
        }
        if self.hr_calibration_den == 0 || self.hr_calibration_num <= 0 {
            return Err(ConfigError::InvalidConfig(
                "HR calibration must be a positive ratio".to_string(),
            ));
        }
        if self.respiration_rate_hz == 0 || self.sampling_rate_hz % self.respiration_rate_hz != 0
        {
            return Err(ConfigError::InvalidConfig(format!(
                "respiration_rate_hz ({}) must evenly divide sampling_rate_hz ({})",
                self.respiration_rate_hz, self.sampling_rate_hz
            )));
        }
        if !(20..=250).contains(&self.sim_heart_rate_bpm) {
            return Err(ConfigError::InvalidConfig(format!(
                "sim_heart_rate_bpm must be between 20 and 250, got {}",
                self.sim_heart_rate_bpm
            )));
        }
        if !(1..=60).contains(&self.sim_breaths_per_min) {
            return Err(ConfigError::InvalidConfig(format!(
                "sim_breaths_per_min must be between 1 and 60, got {}",
                self.sim_breaths_per_min
            )));
        }
        if !(0.0..=1.0).contains(&self.sim_bus_failure_rate) {
            return Err(ConfigError::InvalidConfig(
                "sim_bus_failure_rate must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            period: self.sample_period,
            ppg_divider: self.ppg_divider,
            housekeeping_every: self.housekeeping_every,
        }
    }

    /// Every fused sample carries a PPG reading (repeated between PPG
    /// reads), so the SpO2 window fills at the transaction rate.
    pub fn estimator_config(&self) -> EstimatorConfig {
        EstimatorConfig {
            sampling_rate: self.sampling_rate_hz as usize,
            window_seconds: self.estimator_window_secs,
            hr_calibration: HrCalibration {
                numerator: self.hr_calibration_num,
                denominator: self.hr_calibration_den,
            },
            ..EstimatorConfig::default()
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            estimator: self.estimator_config(),
            respiration: RespirationConfig::for_rate(self.respiration_rate_hz),
            bioz_decimation: (self.sampling_rate_hz / self.respiration_rate_hz).max(1) as usize,
            stream_format: self.stream_format,
            stream_batch: self.stream_batch,
        }
    }

    pub fn drain_config(&self) -> DrainConfig {
        DrainConfig {
            stall_timeout: self.drain_stall_timeout,
            write_timeout: self.drain_stall_timeout,
            ..DrainConfig::default()
        }
    }

    pub fn housekeeping_config(&self) -> HousekeepingConfig {
        HousekeepingConfig {
            stale_after: self.heartbeat_timeout,
            ..HousekeepingConfig::default()
        }
    }

    pub fn display_config(&self) -> DisplayConfig {
        DisplayConfig::default()
    }

    pub fn synthetic_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            ecg_rate_hz: self.sampling_rate_hz,
            ppg_rate_hz: (self.sampling_rate_hz / self.ppg_divider.max(1)).max(1),
            heart_rate_bpm: self.sim_heart_rate_bpm,
            breaths_per_min: self.sim_breaths_per_min,
            noise: self.sim_noise,
            failure_rate: self.sim_bus_failure_rate,
            seed: self.sim_seed,
            contact: !self.sim_probe_detached,
            ..SyntheticConfig::default()
        }
    }
}
