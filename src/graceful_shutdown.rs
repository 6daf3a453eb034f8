//! # Graceful Shutdown Module
//!
//! Shuts the server down cleanly: stop accepting new connections, let
//! in-flight requests finish (bounded by a timeout), then exit.
//!
//! Shutdown process: receive SIGINT/SIGTERM/SIGQUIT, mark shutdown
//! initiated, run the caller's cleanup under a timeout, mark complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "server")]
use tokio::signal;
#[cfg(feature = "server")]
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Tracks shutdown progress via two flags so callers can poll either
/// "has a signal arrived" or "did cleanup finish" independently.
#[derive(Clone)]
pub struct GracefulShutdown {
    pub shutdown_initiated: Arc<AtomicBool>,
    shutdown_complete: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Polls `shutdown_initiated` on a fixed cadence. Meant to be raced in a
    /// `tokio::select!` alongside a loop's own ticker, so the loop exits on
    /// its own once shutdown begins rather than needing an external abort.
    #[cfg(feature = "server")]
    pub async fn wait_for_shutdown(&self) {
        while !self.is_shutdown_initiated() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Relaxed)
    }

    pub fn initiate_shutdown(&self) {
        info!("graceful shutdown initiated");
        self.shutdown_initiated.store(true, Ordering::Relaxed);
    }

    pub fn complete_shutdown(&self) {
        info!("graceful shutdown completed");
        self.shutdown_complete.store(true, Ordering::Relaxed);
    }

    /// Blocks until SIGINT, SIGTERM, or SIGQUIT arrives, then initiates
    /// shutdown.
    #[cfg(feature = "server")]
    pub async fn wait_for_shutdown_signal(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!("waiting for shutdown signal");

        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigquit = signal::unix::signal(signal::unix::SignalKind::quit())?;

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("received SIGINT");
                self.initiate_shutdown();
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                self.initiate_shutdown();
            }
            _ = sigquit.recv() => {
                info!("received SIGQUIT");
                self.initiate_shutdown();
            }
        }

        Ok(())
    }

    /// Runs `cleanup_fn` under `shutdown_timeout`; a timeout forces
    /// shutdown to proceed rather than hanging indefinitely.
    #[cfg(feature = "server")]
    pub async fn graceful_shutdown<F, Fut>(
        &self,
        shutdown_timeout: Duration,
        cleanup_fn: F,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error>>>,
    {
        info!(timeout = ?shutdown_timeout, "starting graceful shutdown");

        match timeout(shutdown_timeout, cleanup_fn()).await {
            Ok(Ok(())) => {
                info!("cleanup completed successfully");
            }
            Ok(Err(e)) => {
                error!("cleanup failed: {}", e);
                return Err(e);
            }
            Err(_) => {
                warn!("cleanup timeout exceeded, forcing shutdown");
            }
        }

        self.complete_shutdown();
        Ok(())
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the task that waits for a shutdown signal and flips `shutdown`'s
/// flag when one arrives. Split out from `setup_shutdown_handler` so a
/// caller that already owns a `GracefulShutdown` wired into its own
/// background loops (see `AppState::shutdown`) can drive that same handle
/// from the process signal instead of juggling two independent ones.
#[cfg(feature = "server")]
pub fn spawn_signal_listener(shutdown: GracefulShutdown) {
    tokio::spawn(async move {
        if let Err(e) = shutdown.wait_for_shutdown_signal().await {
            error!("error waiting for shutdown signal: {}", e);
        }
    });
}

/// Spawns a task that waits for a shutdown signal and returns the shared
/// shutdown handle immediately.
#[cfg(feature = "server")]
pub async fn setup_shutdown_handler() -> Result<GracefulShutdown, Box<dyn std::error::Error>> {
    let shutdown = GracefulShutdown::new();
    spawn_signal_listener(shutdown.clone());
    Ok(shutdown)
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    pub shutdown_timeout: Duration,
    pub drain_timeout: Duration,
    pub force_shutdown: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(10),
            force_shutdown: true,
        }
    }
}

/// Ties a `GracefulShutdown` to a `ShutdownConfig` and owns the
/// wait-for-signal-then-cleanup sequence end to end.
pub struct ServerLifecycle {
    shutdown: GracefulShutdown,
    config: ShutdownConfig,
}

impl ServerLifecycle {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            shutdown: GracefulShutdown::new(),
            config,
        }
    }

    pub fn shutdown(&self) -> &GracefulShutdown {
        &self.shutdown
    }

    #[cfg(feature = "server")]
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        info!("starting server lifecycle management");

        let shutdown_clone = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown_clone.wait_for_shutdown_signal().await {
                error!("error in signal handler: {}", e);
            }
        });

        Ok(())
    }

    #[cfg(feature = "server")]
    pub async fn wait_for_shutdown<F, Fut>(
        &self,
        cleanup_fn: F,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error>>>,
    {
        while !self.shutdown.is_shutdown_initiated() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.shutdown
            .graceful_shutdown(self.config.shutdown_timeout, cleanup_fn)
            .await
    }
}

impl Default for ServerLifecycle {
    fn default() -> Self {
        Self::new(ShutdownConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn new_shutdown_is_not_initiated() {
        let shutdown = GracefulShutdown::new();
        assert!(!shutdown.is_shutdown_initiated());
        assert!(!shutdown.is_shutdown_complete());
    }

    #[tokio::test]
    async fn initiate_sets_flag() {
        let shutdown = GracefulShutdown::new();
        shutdown.initiate_shutdown();
        assert!(shutdown.is_shutdown_initiated());
        assert!(!shutdown.is_shutdown_complete());
    }

    #[tokio::test]
    async fn complete_sets_flag() {
        let shutdown = GracefulShutdown::new();
        shutdown.initiate_shutdown();
        shutdown.complete_shutdown();
        assert!(shutdown.is_shutdown_initiated());
        assert!(shutdown.is_shutdown_complete());
    }

    #[cfg(feature = "server")]
    #[tokio::test]
    async fn wait_for_shutdown_returns_once_initiated() {
        let shutdown = GracefulShutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown().await });

        shutdown.initiate_shutdown();
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("wait_for_shutdown should return promptly after shutdown")
            .unwrap();
    }

    #[cfg(feature = "server")]
    #[tokio::test]
    async fn cleanup_completes_within_timeout() {
        let shutdown = GracefulShutdown::new();
        shutdown.initiate_shutdown();

        let result = shutdown
            .graceful_shutdown(Duration::from_secs(1), || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert!(shutdown.is_shutdown_complete());
    }

    #[cfg(feature = "server")]
    #[tokio::test]
    async fn cleanup_exceeding_timeout_still_completes_shutdown() {
        let shutdown = GracefulShutdown::new();
        shutdown.initiate_shutdown();

        let result = shutdown
            .graceful_shutdown(Duration::from_millis(100), || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert!(shutdown.is_shutdown_complete());
    }
}
