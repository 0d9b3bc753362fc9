pub mod config;
pub mod initialization;
pub mod logging_system;
pub mod service;
pub mod shutdown;

pub use config::{Config, ConfigError, OutputTarget};
pub use initialization::{InitializationError, LogDirective, LogLevel};
pub use logging_system::{LoggingSystem, setup_logging_safe};
pub use service::{ServiceError, ServiceManager};
pub use shutdown::ShutdownHandle;

use crate::domain::PipelineError;
use clap::Parser;
use std::process;
use tracing::{error, info, warn};

pub struct App {
    service_manager: ServiceManager,
}

impl App {
    pub async fn from_args<I, T>(args: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args)?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: Config) -> Result<Self, PipelineError> {
        setup_logging_safe(config.log_level, config.log_json, &config.log_directives)?;

        info!("Starting vitals-core v{}", env!("CARGO_PKG_VERSION"));
        if let Some(path) = &config.config_file {
            info!(path = %path.display(), "Configuration file applied");
        }
        info!(
            hr_source = %config.hr_source,
            queue_capacity = config.queue_capacity,
            ring_buffer_size = config.ring_buffer_size,
            run_duration_s = config.run_duration_secs,
            "Configuration loaded"
        );

        let service_manager = ServiceManager::new(config)?;
        Ok(Self { service_manager })
    }

    pub async fn run(mut self) -> Result<(), PipelineError> {
        let shutdown_handle = self.service_manager.start().await?;

        info!("vitals-core is running. Press Ctrl+C to stop.");
        shutdown_handle.wait_for_shutdown().await;

        let report = self.service_manager.get_health_report().await;
        let snapshot = self.service_manager.channels().snapshot();
        info!(
            health = ?report.overall_status,
            heart_rate = snapshot.heart_rate.map(|hr| hr.bpm),
            spo2 = snapshot.spo2,
            respiration = snapshot.respiration,
            "vitals-core stopped."
        );
        match serde_json::to_string(&report) {
            Ok(json) => info!(report = %json, "Final health report"),
            Err(e) => warn!(error = %e, "Health report could not be serialised"),
        }
        Ok(())
    }

    pub fn service(&self) -> &ServiceManager {
        &self.service_manager
    }

    pub async fn health_check(&self) -> crate::reliability::HealthReport {
        self.service_manager.get_health_report().await
    }
}

pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && (args[1] == "--version" || args[1] == "-V") {
        println!("vitals-core {}", get_version());
        return Ok(());
    }

    if args.len() > 1 && (args[1] == "--help" || args[1] == "-h") {
        Config::parse_from(["vitals-core", "--help"]);
        return Ok(());
    }

    match App::from_args(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("Application error: {}", e);
                process::exit(1);
            }
        }
        Err(e) => {
            // Logging may not be up yet
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    }

    Ok(())
}
