//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM and SIGINT, broadcasts a shutdown signal to the HTTP
//! server, and closes the database connection exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, OnceCell};
use anyhow::Context;
use tracing::{debug, info, warn};
use crate::db::{ConnectionManager, StoreDriver};
use crate::Result;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Latched on the first trigger, for callers that subscribe late
    shutdown_requested: AtomicBool,
    /// Set once signal handlers are attached
    handlers_installed: AtomicBool,
    /// Settles once the database has been closed
    database_closed: OnceCell<()>,
    /// Bound on how long closing the database may take
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shutdown_tx,
            shutdown_requested: AtomicBool::new(false),
            handlers_installed: AtomicBool::new(false),
            database_closed: OnceCell::new(),
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast the shutdown signal
    pub fn trigger(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No shutdown listeners: {}", e);
        }
    }

    /// Attach the signal listener in the background.
    ///
    /// Returns `false` when handlers were already installed; no second listener
    /// is attached in that case.
    pub fn install_signal_handlers(self: &Arc<Self>) -> bool {
        if self.handlers_installed.swap(true, Ordering::SeqCst) {
            debug!("Signal handlers already installed");
            return false;
        }

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = coordinator.listen_for_signals().await {
                warn!("Error setting up signal handlers: {}", e);
            }
        });
        true
    }

    /// Wait for the first shutdown signal (SIGTERM, SIGINT), then broadcast it
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Disconnect the database once, however many callers race here.
    ///
    /// Concurrent callers wait for the single disconnect to finish. A failed
    /// disconnect is reported to the caller that ran it and not retried.
    pub async fn shutdown_database<D: StoreDriver>(&self, manager: &ConnectionManager<D>) -> Result<()> {
        let mut outcome = Ok(());
        let slot = &mut outcome;

        self.database_closed
            .get_or_init(|| async move {
                info!("Closing database connection (timeout: {:?})", self.timeout);
                *slot = match tokio::time::timeout(self.timeout, manager.disconnect()).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(anyhow::Error::new(e).context("Database disconnect failed")),
                    Err(_) => Err(anyhow::anyhow!("Database disconnect timed out after {:?}", self.timeout)),
                };
            })
            .await;

        outcome
    }

    /// Whether shutdown has been triggered
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Run the startup connect, abandoning it if shutdown is requested first.
    ///
    /// Returns `Ok(false)` when shutdown won; the database is closed by then.
    pub async fn connect_or_shutdown<D: StoreDriver>(&self, manager: &ConnectionManager<D>) -> Result<bool> {
        let mut shutdown_rx = self.subscribe();

        if !self.is_shutdown_requested() {
            tokio::select! {
                result = manager.connect() => {
                    result.context("Database connection could not be established")?;
                    return Ok(true);
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested while connecting to the database");
                }
            }
        }

        self.shutdown_database(manager).await?;
        Ok(false)
    }

    /// Whether the database has already been closed
    pub fn is_database_closed(&self) -> bool {
        self.database_closed.initialized()
    }
}
