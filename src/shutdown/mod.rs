//! Graceful shutdown.
//!
//! 1. Wait for Ctrl+C or SIGTERM
//! 2. Broadcast the shutdown signal to workers and the sweeper
//! 3. Wait for background tasks to finish their current record/sweep,
//!    aborting any that exceed the drain timeout

use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for background tasks to stop (default: 30 seconds)
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Coordinates stopping the background tasks.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(String, JoinHandle<()>)>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(shutdown_tx: broadcast::Sender<()>, config: ShutdownConfig) -> Self {
        Self {
            shutdown_tx,
            tasks: Vec::new(),
            config,
        }
    }

    /// Track a task that stops on the shutdown signal.
    pub fn register(&mut self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.push((name.into(), handle));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    #[tracing::instrument(name = "graceful_shutdown", skip(self), fields(tasks = self.tasks.len()))]
    pub async fn execute(self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - signaling background tasks");
        let _ = self.shutdown_tx.send(());

        let mut pending: FuturesUnordered<_> = self
            .tasks
            .into_iter()
            .map(|(name, handle)| async move { (name, handle.await) })
            .collect();

        let mut stopped = 0;
        let drained = timeout(self.config.drain_timeout, async {
            while let Some((name, joined)) = pending.next().await {
                match joined {
                    Ok(()) => tracing::debug!(task = %name, "Task stopped"),
                    Err(e) => tracing::warn!(task = %name, error = %e, "Task ended abnormally"),
                }
                stopped += 1;
            }
        })
        .await;

        result.tasks_stopped = stopped;
        if drained.is_err() {
            // Remaining tasks are detached; the runtime stops them on exit
            result.tasks_timed_out = pending.len();
            tracing::warn!(
                remaining = result.tasks_timed_out,
                timeout_secs = self.config.drain_timeout.as_secs(),
                "Some tasks did not stop before the drain timeout"
            );
        }

        result.duration = start.elapsed();
        result.success = result.tasks_timed_out == 0;

        tracing::info!(
            tasks_stopped = result.tasks_stopped,
            tasks_timed_out = result.tasks_timed_out,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    pub tasks_stopped: usize,
    pub tasks_timed_out: usize,
    pub duration: Duration,
}

/// Resolve on Ctrl+C or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received terminate signal, initiating graceful shutdown"),
    }
}
