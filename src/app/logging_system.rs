use super::initialization::{InitializationError, LogDirective, LogLevel};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::{Mutex, Once};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<LogDirective>>>,
    fallback_level: LogLevel,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: Arc::new(RwLock::new(Vec::new())),
            fallback_level: LogLevel::Info,
        }
    }

    /// Adds a `target=level` directive. An unknown level falls back to the
    /// default level; an unparseable directive is skipped with a warning.
    pub fn add_directive(&self, directive_str: &str) -> Result<(), InitializationError> {
        match LogDirective::parse(directive_str) {
            Ok(directive) => {
                self.directives.write().push(directive);
                Ok(())
            }
            Err(InitializationError::InvalidLogLevel { .. }) => {
                eprintln!("Warning: unknown level in '{directive_str}', using default level");
                let target = directive_str.split('=').next().unwrap_or_default().trim();
                self.directives
                    .write()
                    .push(LogDirective::new(target, self.fallback_level));
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                eprintln!("Warning: {e}, skipping directive");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Keeps the noisy runtime crates quiet unless asked for.
    pub fn add_default_directives(&self) {
        let defaults = [("tokio", LogLevel::Warn), ("runtime", LogLevel::Warn)];
        let mut directives = self.directives.write();
        for (target, level) in defaults {
            directives.push(LogDirective::new(target, level));
        }
    }

    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        json: bool,
    ) -> Result<(), InitializationError> {
        let filter_string = self.build_filter_string(default_level);

        let env_filter = EnvFilter::try_new(&filter_string).map_err(|e| {
            InitializationError::LoggingInitFailed {
                details: format!("Failed to create EnvFilter with '{filter_string}'"),
                source: Box::new(e),
            }
        })?;

        // Logs go to stderr so a stdout stream sink stays binary-clean
        let result = if json {
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(env_filter).with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_writer(std::io::stderr),
                ),
            )
        } else {
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(env_filter).with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_writer(std::io::stderr)
                        .compact(),
                ),
            )
        };

        result.map_err(|e| InitializationError::LoggingInitFailed {
            details: "Failed to set global tracing subscriber".to_string(),
            source: Box::new(e),
        })
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();
        let mut filter_parts = Vec::with_capacity(directives.len() + 1);
        filter_parts.push(default_level.as_str().to_string());
        filter_parts.extend(directives.iter().map(LogDirective::to_filter_string));
        filter_parts.join(",")
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }

    pub fn clear_directives(&self) {
        self.directives.write().clear();
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global subscriber once per process. `extra` directives come
/// from `RUST_LOG`-style configuration and are applied after the defaults.
pub fn setup_logging_safe(
    level: LogLevel,
    json: bool,
    extra: &[String],
) -> Result<(), InitializationError> {
    static INIT: Once = Once::new();
    static INIT_ERROR: Mutex<Option<String>> = Mutex::new(None);

    INIT.call_once(|| {
        let logging_system = LoggingSystem::new();
        logging_system.add_default_directives();

        let result: Result<(), InitializationError> = (|| {
            for directive in extra {
                logging_system.add_directive(directive)?;
            }
            logging_system.initialize_tracing(level, json)
        })();

        if let Err(e) = result
            && let Ok(mut slot) = INIT_ERROR.lock()
        {
            *slot = Some(e.to_string());
        }
    });

    let failure = INIT_ERROR.lock().ok().and_then(|slot| slot.clone());
    match failure {
        None => Ok(()),
        Some(details) => Err(InitializationError::LoggingInitFailed {
            details,
            source: Box::new(std::io::Error::other("Logging initialization error")),
        }),
    }
}
