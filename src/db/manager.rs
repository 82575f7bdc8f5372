//! Connection Manager Implementation
//!
//! State machine owning the single connection handle:
//!
//! ```text
//! Idle ──connect()──▶ Connecting ──open ok──▶ Connected
//!   ▲                    │  ▲ retry with backoff  │
//!   └──── exhausted ─────┘  └──── grace timer ────┤ driver: Disconnected
//!                                                 ▼
//!                                            Disconnected
//! any ──disconnect()──▶ ShuttingDown (terminal)
//! ```

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::{BackoffSchedule, DEFAULT_JITTER};
use super::driver::{DriverEvent, DriverSession, StoreDriver};
use super::DbError;
use crate::metrics::Metrics;

/// Immutable connection tunables
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub jitter: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub socket_timeout: Duration,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub db_name: String,
    /// Flat wait after an unexpected disconnect before reconnecting
    #[serde(with = "humantime_serde")]
    pub reconnect_grace: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30000),
            jitter: DEFAULT_JITTER,
            connect_timeout: Duration::from_millis(60000),
            socket_timeout: Duration::from_millis(45000),
            min_pool_size: 5,
            max_pool_size: 10,
            db_name: "docker-db".to_string(),
            reconnect_grace: Duration::from_millis(5000),
        }
    }
}

impl ConnectionConfig {
    pub fn backoff(&self) -> BackoffSchedule {
        BackoffSchedule::new(self.initial_delay, self.max_delay).with_jitter(self.jitter)
    }
}

/// Lifecycle state of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    ShuttingDown,
}

/// Read-only connection status, for health and readiness reporting
pub trait ConnectionStatus: Send + Sync {
    fn is_connected(&self) -> bool;
    fn state(&self) -> ConnectionState;
}

struct PendingReconnect {
    generation: u64,
    cancel: CancellationToken,
}

struct Inner<H> {
    state: ConnectionState,
    handle: Option<H>,
    ever_connected: bool,
    reconnect: Option<PendingReconnect>,
    next_generation: u64,
    attempt_cancel: Option<CancellationToken>,
    watcher: Option<JoinHandle<()>>,
}

impl<H> Inner<H> {
    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            debug!(generation = pending.generation, "Cancelling pending reconnect");
            pending.cancel.cancel();
        }
    }

    fn resting_state(&self) -> ConnectionState {
        if self.ever_connected {
            ConnectionState::Disconnected
        } else {
            ConnectionState::Idle
        }
    }
}

/// Owns the single connection handle and its lifecycle.
///
/// Construct once at startup and share the returned `Arc` with every consumer.
pub struct ConnectionManager<D: StoreDriver> {
    driver: D,
    config: ConnectionConfig,
    inner: Mutex<Inner<D::Handle>>,
    attempt_in_flight: watch::Sender<bool>,
    metrics: Option<Arc<Metrics>>,
    me: Weak<Self>,
}

impl<D: StoreDriver> ConnectionManager<D> {
    pub fn new(driver: D, config: ConnectionConfig) -> Arc<Self> {
        Self::build(driver, config, None)
    }

    pub fn with_metrics(driver: D, config: ConnectionConfig, metrics: Arc<Metrics>) -> Arc<Self> {
        Self::build(driver, config, Some(metrics))
    }

    fn build(driver: D, config: ConnectionConfig, metrics: Option<Arc<Metrics>>) -> Arc<Self> {
        let (attempt_in_flight, _) = watch::channel(false);

        Arc::new_cyclic(|me| Self {
            driver,
            config,
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                handle: None,
                ever_connected: false,
                reconnect: None,
                next_generation: 0,
                attempt_cancel: None,
                watcher: None,
            }),
            attempt_in_flight,
            metrics,
            me: me.clone(),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn lock(&self) -> MutexGuard<'_, Inner<D::Handle>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Establish the connection, retrying with backoff.
    ///
    /// Resolves on the first successful attempt or once `max_attempts` have
    /// failed. A call made while another attempt sequence is in flight returns
    /// immediately without starting a second one.
    pub async fn connect(&self) -> Result<(), DbError> {
        let cancel = {
            let mut inner = self.lock();
            match inner.state {
                ConnectionState::Connecting => {
                    warn!("Connection attempt already in progress");
                    return Ok(());
                }
                ConnectionState::Connected => {
                    debug!("Already connected, nothing to do");
                    return Ok(());
                }
                ConnectionState::ShuttingDown => return Err(DbError::ShuttingDown),
                ConnectionState::Idle | ConnectionState::Disconnected => {}
            }

            inner.cancel_reconnect();
            inner.state = ConnectionState::Connecting;
            let cancel = CancellationToken::new();
            inner.attempt_cancel = Some(cancel.clone());
            self.attempt_in_flight.send_replace(true);
            cancel
        };

        let mut guard = AttemptGuard {
            manager: self,
            settled: false,
        };
        let result = self.run_attempts(&cancel).await;
        let (outcome, stale) = self.settle(result);
        guard.settled = true;
        drop(guard);

        if let Some(stale) = stale {
            debug!("Closing handle replaced by reconnect");
            if let Err(e) = self.driver.close(stale).await {
                warn!(error = %e, "Failed to close stale connection handle");
            }
        }
        outcome
    }

    async fn run_attempts(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DriverSession<D::Handle>, DbError> {
        let max_attempts = self.config.max_attempts.max(1);
        let backoff = self.config.backoff();
        let mut attempt = 0;

        loop {
            if let Some(metrics) = &self.metrics {
                metrics.record_connect_attempt();
            }

            let opened = tokio::select! {
                _ = cancel.cancelled() => return Err(DbError::ShuttingDown),
                opened = self.driver.open(&self.config) => opened,
            };

            let err = match opened {
                Ok(session) => return Ok(session),
                Err(e) => e,
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_connect_failure();
            }

            if attempt + 1 >= max_attempts {
                return Err(DbError::ConnectExhausted {
                    attempts: max_attempts,
                    source: Box::new(err),
                });
            }

            let delay = backoff.delay(attempt);
            warn!(
                error = %err,
                "Connection attempt {}/{} failed. Retrying in {}s...",
                attempt + 1,
                max_attempts,
                delay.as_secs_f64().round()
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(DbError::ShuttingDown),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Apply the outcome of an attempt sequence. Also returns a replaced handle
    /// that still needs closing.
    fn settle(
        &self,
        result: Result<DriverSession<D::Handle>, DbError>,
    ) -> (Result<(), DbError>, Option<D::Handle>) {
        let mut inner = self.lock();
        inner.attempt_cancel = None;

        match result {
            Ok(DriverSession { handle, events }) => {
                if let Some(watcher) = inner.watcher.take() {
                    watcher.abort();
                }
                let stale = inner.handle.replace(handle);

                if inner.state == ConnectionState::ShuttingDown {
                    // disconnect() is waiting on us and closes the new handle
                    debug!("Connection opened after shutdown began");
                    return (Err(DbError::ShuttingDown), stale);
                }

                inner.state = ConnectionState::Connected;
                inner.ever_connected = true;
                inner.cancel_reconnect();
                inner.watcher = Some(self.spawn_watcher(events));
                if let Some(metrics) = &self.metrics {
                    metrics.set_db_connected(true);
                }
                info!(db_name = %self.config.db_name, "Successfully connected to database");
                (Ok(()), stale)
            }
            Err(e) => {
                if inner.state != ConnectionState::ShuttingDown {
                    inner.state = inner.resting_state();
                }
                (Err(e), None)
            }
        }
    }

    fn spawn_watcher(&self, mut events: mpsc::UnboundedReceiver<DriverEvent>) -> JoinHandle<()> {
        let me = self.me.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = me.upgrade() else {
                    break;
                };
                manager.handle_event(event);
            }
            debug!("Driver event stream closed");
        })
    }

    /// React to an asynchronous driver notification
    pub(crate) fn handle_event(&self, event: DriverEvent) {
        let mut inner = self.lock();

        match event {
            DriverEvent::Disconnected => match inner.state {
                ConnectionState::Connected | ConnectionState::Disconnected => {
                    if inner.state == ConnectionState::Connected {
                        warn!("Database disconnected, attempting to reconnect...");
                        inner.state = ConnectionState::Disconnected;
                        if let Some(metrics) = &self.metrics {
                            metrics.set_db_connected(false);
                        }
                    }

                    if inner.reconnect.is_some() {
                        debug!("Reconnect already scheduled");
                    } else {
                        self.schedule_reconnect(&mut inner);
                    }
                }
                state => debug!(?state, "Ignoring disconnect notification"),
            },
            DriverEvent::Connected => {
                if inner.state == ConnectionState::Disconnected && inner.handle.is_some() {
                    info!("Database connection restored");
                    inner.state = ConnectionState::Connected;
                    inner.cancel_reconnect();
                    if let Some(metrics) = &self.metrics {
                        metrics.set_db_connected(true);
                    }
                }
            }
            DriverEvent::Error(message) => {
                error!(error = %message, "Database connection error");
            }
        }
    }

    fn schedule_reconnect(&self, inner: &mut Inner<D::Handle>) {
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let cancel = CancellationToken::new();
        inner.reconnect = Some(PendingReconnect {
            generation,
            cancel: cancel.clone(),
        });

        if let Some(metrics) = &self.metrics {
            metrics.record_reconnect_scheduled();
        }

        let grace = self.config.reconnect_grace;
        let me = self.me.clone();
        info!(generation, "Reconnecting in {:?}", grace);

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(grace) => {}
            }

            let Some(manager) = me.upgrade() else {
                return;
            };
            if !manager.claim_reconnect(generation) {
                debug!(generation, "Stale reconnect timer, skipping");
                return;
            }
            if let Err(e) = manager.connect().await {
                error!("Failed to reconnect after disconnect: {:#}", anyhow::Error::new(e));
            }
        });
    }

    /// Take ownership of the pending reconnect if it is still the current one
    fn claim_reconnect(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        match &inner.reconnect {
            Some(pending) if pending.generation == generation => {
                inner.reconnect = None;
                true
            }
            _ => false,
        }
    }

    /// Close the connection and stop all further attempts.
    ///
    /// Safe in any state and on repeated calls. An in-flight attempt sequence
    /// is cancelled and awaited before the handle is closed.
    pub async fn disconnect(&self) -> Result<(), DbError> {
        {
            let mut inner = self.lock();
            inner.cancel_reconnect();
            if let Some(cancel) = &inner.attempt_cancel {
                cancel.cancel();
            }
            if inner.state != ConnectionState::ShuttingDown {
                debug!(from = ?inner.state, "Connection manager shutting down");
                inner.state = ConnectionState::ShuttingDown;
            }
        }

        let mut in_flight = self.attempt_in_flight.subscribe();
        let _ = in_flight.wait_for(|busy| !*busy).await;

        let (handle, watcher) = {
            let mut inner = self.lock();
            (inner.handle.take(), inner.watcher.take())
        };
        if let Some(watcher) = watcher {
            watcher.abort();
        }
        if let Some(metrics) = &self.metrics {
            metrics.set_db_connected(false);
        }

        match handle {
            Some(handle) => match self.driver.close(handle).await {
                Ok(()) => {
                    info!("Disconnected from database");
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Error during database disconnect");
                    Err(e)
                }
            },
            None => {
                debug!("No open connection to close");
                Ok(())
            }
        }
    }

    /// The live handle, only while connected. Do not cache it.
    pub fn get_connection(&self) -> Result<D::Handle, DbError> {
        let inner = self.lock();
        match (&inner.state, &inner.handle) {
            (ConnectionState::Connected, Some(handle)) => Ok(handle.clone()),
            _ => Err(DbError::NotConnected),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Whether an automatic reconnect is currently scheduled
    pub fn reconnect_pending(&self) -> bool {
        self.lock().reconnect.is_some()
    }
}

/// Ends an attempt sequence even when the `connect()` future is dropped
/// mid-flight, e.g. by an outer `tokio::time::timeout`.
struct AttemptGuard<'a, D: StoreDriver> {
    manager: &'a ConnectionManager<D>,
    settled: bool,
}

impl<D: StoreDriver> Drop for AttemptGuard<'_, D> {
    fn drop(&mut self) {
        if !self.settled {
            let mut inner = self.manager.lock();
            inner.attempt_cancel = None;
            if inner.state == ConnectionState::Connecting {
                debug!("Connect abandoned by its caller");
                inner.state = inner.resting_state();
            }
        }
        self.manager.attempt_in_flight.send_replace(false);
    }
}

impl<D: StoreDriver> ConnectionStatus for ConnectionManager<D> {
    fn is_connected(&self) -> bool {
        ConnectionManager::is_connected(self)
    }

    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }
}
