//! Graceful shutdown coordination.
//!
//! A [`ShutdownSignal`] is cloned into every long-running task (the bus
//! worker loop, the binary's main task). When SIGINT/SIGTERM arrives, or
//! [`ShutdownSignal::trigger`] is called, every subscriber is notified.
//!
//! # Example
//!
//! ```rust,ignore
//! use axon::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let worker = tokio::spawn(bus.clone().run(shutdown.clone()));
//!
//! shutdown.wait().await;
//! let _ = tokio::time::timeout(shutdown.timeout(), worker).await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Default shutdown timeout in seconds.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 30;

/// Broadcast shutdown notification shared by all clones.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
    /// How long tasks get to finish once shutdown starts
    timeout: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with default timeout (30 seconds).
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for SIGINT or SIGTERM, then notify all subscribers.
    ///
    /// If a handler cannot be installed that source is ignored; if none can
    /// be installed this only returns on [`trigger`](Self::trigger).
    pub async fn wait(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let mut manual = self.sender.subscribe();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = manual.recv() => {
                info!("Shutdown requested, initiating graceful shutdown...");
                return;
            }
        }

        self.notify();
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    /// Whether shutdown has been triggered by any clone.
    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Trigger shutdown manually (for testing or programmatic shutdown).
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        self.notify();
    }

    fn notify(&self) {
        self.triggered.store(true, Ordering::SeqCst);
        let _ = self.sender.send(());
    }

    /// Wait for a shutdown notification for at most `timeout`.
    ///
    /// Returns `true` if shutdown was signalled in time.
    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        if self.is_shutdown() {
            return true;
        }
        let mut receiver = self.sender.subscribe();

        tokio::select! {
            _ = receiver.recv() => true,
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Shutdown timeout reached"
                );
                false
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
