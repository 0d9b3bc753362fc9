use super::service::ServiceError;
use futures::future::join_all;
use std::time::Duration;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Time the tasks get to observe cancellation and finish their last pass.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug)]
pub struct ShutdownHandle {
    token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    run_duration: Option<Duration>,
}

impl ShutdownHandle {
    pub fn new(
        token: CancellationToken,
        tasks: Vec<(&'static str, JoinHandle<()>)>,
        run_duration: Option<Duration>,
    ) -> Self {
        Self {
            token,
            tasks,
            run_duration,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    pub async fn shutdown(self) -> Result<(), ServiceError> {
        info!("Initiating graceful shutdown...");
        self.token.cancel();

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        let Ok(results) = tokio::time::timeout(SHUTDOWN_TIMEOUT, join_all(handles)).await else {
            error!("Shutdown timeout exceeded");
            return Err(ServiceError::ShutdownTimeout);
        };

        for (name, result) in names.into_iter().zip(results) {
            if let Err(e) = result {
                warn!(task = name, error = %e, "Task ended abnormally");
            }
        }

        info!("Graceful shutdown completed");
        Ok(())
    }

    /// Waits for SIGINT/SIGTERM, the configured run duration, or an external
    /// cancel of the token, then shuts everything down.
    pub async fn wait_for_shutdown(self) {
        let token = self.token.clone();
        let run_duration = self.run_duration;

        tokio::select! {
            _ = wait_for_signal() => {}
            _ = token.cancelled() => info!("Shutdown requested"),
            _ = sleep_or_forever(run_duration) => {
                info!(
                    run_duration_s = run_duration.map(|d| d.as_secs()),
                    "Run duration elapsed"
                );
            }
        }

        if let Err(e) = self.shutdown().await {
            error!("Shutdown error: {}", e);
        }
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending::<()>().await,
    }
}

/// Resolves on the first termination signal. A handler that cannot be
/// installed is logged and never fires, leaving the other paths usable.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match unix_signal(SignalKind::terminate()) {
            Ok(sigterm) => Some(sigterm),
            Err(err) => {
                error!("Failed to create SIGTERM handler: {}", err);
                None
            }
        };
        let sigterm_recv = async {
            match sigterm.as_mut() {
                Some(sigterm) => {
                    sigterm.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = ctrl_c() => {
                if result {
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                }
            }
            _ = sigterm_recv => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if ctrl_c().await {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
    }
}

async fn ctrl_c() -> bool {
    match signal::ctrl_c().await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to listen for SIGINT: {}", err);
            std::future::pending::<()>().await;
            false
        }
    }
}
