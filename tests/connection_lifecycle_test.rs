//! Connection lifecycle tests: retries, reconnection and shutdown against a
//! scripted in-memory driver.

use async_trait::async_trait;
use restbase::db::{
    ConnectionConfig, ConnectionManager, ConnectionState, DbError, DriverEvent, DriverSession,
    StoreDriver,
};
use restbase::metrics::Metrics;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep, Instant};

/// Driver whose open attempts follow a script of outcomes
#[derive(Default)]
struct ScriptedDriver {
    /// `false` fails the attempt; an empty script succeeds
    script: Mutex<VecDeque<bool>>,
    /// When set, every open waits for a permit before resolving
    gate: Option<Arc<Semaphore>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    events: Mutex<Option<mpsc::UnboundedSender<DriverEvent>>>,
}

impl ScriptedDriver {
    fn with_script(outcomes: &[bool]) -> Self {
        Self {
            script: Mutex::new(outcomes.iter().copied().collect()),
            ..Default::default()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn emit(&self, event: DriverEvent) {
        let events = self.events.lock().unwrap();
        events
            .as_ref()
            .expect("no open session")
            .send(event)
            .expect("session event stream closed");
    }
}

#[async_trait]
impl StoreDriver for ScriptedDriver {
    type Handle = usize;

    async fn open(&self, _config: &ConnectionConfig) -> Result<DriverSession<usize>, DbError> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let succeed = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if !succeed {
            return Err(DbError::driver(format!("attempt {} refused", attempt)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        Ok(DriverSession::new(attempt, rx))
    }

    async fn close(&self, _handle: usize) -> Result<(), DbError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config(max_attempts: u32) -> ConnectionConfig {
    ConnectionConfig {
        max_attempts,
        ..ConnectionConfig::default()
    }
}

/// Let spawned watcher and timer tasks run
async fn settle() {
    sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_after_max_attempts() {
    let config = test_config(3);
    let backoff = config.backoff();
    let manager = ConnectionManager::new(ScriptedDriver::with_script(&[false, false, false]), config);

    let started = Instant::now();
    let err = manager.connect().await.unwrap_err();
    let elapsed = started.elapsed();

    match &err {
        DbError::ConnectExhausted { attempts, source } => {
            assert_eq!(*attempts, 3);
            assert_eq!(source.to_string(), "Driver error: attempt 3 refused");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(manager.driver().opens(), 3);
    assert!(elapsed >= backoff.base_delay(0) + backoff.base_delay(1));
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert!(manager.get_connection().unwrap_err().is_not_connected());
}

#[tokio::test(start_paused = true)]
async fn test_second_attempt_succeeds_after_one_backoff() {
    let config = test_config(5);
    let backoff = config.backoff();
    let manager = ConnectionManager::new(ScriptedDriver::with_script(&[false, true]), config);

    let started = Instant::now();
    manager.connect().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(manager.driver().opens(), 2);
    assert!(elapsed >= backoff.base_delay(0));
    assert!(elapsed <= backoff.base_delay(0) + Duration::from_millis(1000));
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.get_connection().unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_can_be_retried_explicitly() {
    let manager = ConnectionManager::new(
        ScriptedDriver::with_script(&[false, false]),
        test_config(2),
    );

    assert!(manager.connect().await.is_err());
    assert_eq!(manager.state(), ConnectionState::Idle);

    // The attempt counter restarts with every call
    manager.connect().await.unwrap();
    assert!(manager.is_connected());
    assert_eq!(manager.driver().opens(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connect_runs_single_attempt_sequence() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = ConnectionManager::new(ScriptedDriver::gated(gate.clone()), test_config(5));

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect().await }
    });

    while manager.driver().opens() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(manager.state(), ConnectionState::Connecting);

    // Returns immediately without a parallel attempt
    manager.connect().await.unwrap();
    assert_eq!(manager.driver().opens(), 1);
    assert!(!manager.is_connected());

    gate.add_permits(1);
    first.await.unwrap().unwrap();

    assert!(manager.is_connected());
    assert_eq!(manager.driver().opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_event_triggers_single_automatic_reconnect() {
    let metrics = Arc::new(Metrics::new());
    let manager = ConnectionManager::with_metrics(
        ScriptedDriver::default(),
        test_config(5),
        metrics.clone(),
    );
    manager.connect().await.unwrap();
    assert!(metrics.is_db_connected());

    manager.driver().emit(DriverEvent::Disconnected);
    settle().await;

    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(manager.get_connection().unwrap_err().is_not_connected());
    assert!(manager.reconnect_pending());

    // A second notification before the grace period ends schedules nothing new
    manager.driver().emit(DriverEvent::Disconnected);
    settle().await;
    assert_eq!(metrics.get_reconnects_scheduled(), 1);
    assert_eq!(manager.driver().opens(), 1);

    sleep(manager.config().reconnect_grace).await;
    settle().await;

    assert!(manager.is_connected());
    assert!(!manager.reconnect_pending());
    assert_eq!(manager.driver().opens(), 2);
    assert_eq!(manager.get_connection().unwrap(), 2);
    assert_eq!(metrics.get_reconnects_scheduled(), 1);
    // The handle lost in the disconnect was closed once replaced
    assert_eq!(manager.driver().closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_connect_cancels_pending_reconnect() {
    let manager = ConnectionManager::new(ScriptedDriver::default(), test_config(5));
    manager.connect().await.unwrap();

    manager.driver().emit(DriverEvent::Disconnected);
    settle().await;
    assert!(manager.reconnect_pending());

    manager.connect().await.unwrap();
    assert!(!manager.reconnect_pending());
    assert_eq!(manager.driver().opens(), 2);

    // The cancelled timer never fires a third attempt
    sleep(manager.config().reconnect_grace * 2).await;
    assert_eq!(manager.driver().opens(), 2);
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_failed_automatic_reconnect_is_not_propagated() {
    let manager = ConnectionManager::new(
        ScriptedDriver::with_script(&[true, false, false]),
        test_config(2),
    );
    manager.connect().await.unwrap();

    manager.driver().emit(DriverEvent::Disconnected);
    settle().await;
    sleep(manager.config().reconnect_grace + Duration::from_secs(10)).await;

    assert_eq!(manager.driver().opens(), 3);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
    assert!(!manager.reconnect_pending());

    // An explicit connect still works afterwards
    manager.connect().await.unwrap();
    assert!(manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_without_connection_skips_close() {
    let manager = ConnectionManager::new(ScriptedDriver::default(), test_config(5));

    tokio_test::assert_ok!(manager.disconnect().await);
    tokio_test::assert_ok!(manager.disconnect().await);

    assert_eq!(manager.driver().closes(), 0);
    assert_eq!(manager.state(), ConnectionState::ShuttingDown);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_handle_once() {
    let manager = ConnectionManager::new(ScriptedDriver::default(), test_config(5));
    manager.connect().await.unwrap();

    manager.disconnect().await.unwrap();
    manager.disconnect().await.unwrap();

    assert_eq!(manager.driver().closes(), 1);
    assert!(!manager.is_connected());
    assert!(manager.get_connection().unwrap_err().is_not_connected());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff_stops_retries() {
    let manager = ConnectionManager::new(
        ScriptedDriver::with_script(&[false, false, false, false, false]),
        test_config(5),
    );

    let connecting = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect().await }
    });

    while manager.driver().opens() == 0 {
        tokio::task::yield_now().await;
    }
    manager.disconnect().await.unwrap();

    let result = connecting.await.unwrap();
    assert!(matches!(result, Err(DbError::ShuttingDown)));

    sleep(Duration::from_secs(120)).await;
    assert_eq!(manager.driver().opens(), 1);
    assert_eq!(manager.state(), ConnectionState::ShuttingDown);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    let manager = ConnectionManager::new(ScriptedDriver::default(), test_config(5));
    manager.connect().await.unwrap();

    manager.driver().emit(DriverEvent::Disconnected);
    settle().await;
    assert!(manager.reconnect_pending());

    manager.disconnect().await.unwrap();
    assert!(!manager.reconnect_pending());

    sleep(manager.config().reconnect_grace * 2).await;
    assert_eq!(manager.driver().opens(), 1);
    assert_eq!(manager.driver().closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_waits_for_in_flight_open() {
    let gate = Arc::new(Semaphore::new(0));
    let manager = ConnectionManager::new(ScriptedDriver::gated(gate.clone()), test_config(5));

    let connecting = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect().await }
    });
    while manager.driver().opens() == 0 {
        tokio::task::yield_now().await;
    }

    manager.disconnect().await.unwrap();
    assert!(matches!(connecting.await.unwrap(), Err(DbError::ShuttingDown)));

    // The open was abandoned before producing a handle
    gate.add_permits(1);
    settle().await;
    assert_eq!(manager.driver().closes(), 0);
    assert!(!manager.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_connect_dropped_by_timeout_releases_manager() {
    let manager = ConnectionManager::new(
        ScriptedDriver::with_script(&[false, false, true]),
        test_config(5),
    );

    // The first attempt fails and the backoff outlasts the deadline
    let timed_out = tokio::time::timeout(Duration::from_millis(500), manager.connect()).await;
    assert!(timed_out.is_err());
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert_eq!(manager.driver().opens(), 1);

    // A later connect runs its own attempt sequence
    manager.connect().await.unwrap();
    assert!(manager.is_connected());
    assert_eq!(manager.driver().opens(), 3);

    let closed = tokio::time::timeout(Duration::from_secs(600), manager.disconnect()).await;
    tokio_test::assert_ok!(closed.expect("disconnect did not finish"));
    assert_eq!(manager.driver().closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_dropped_after_disconnect_event_keeps_disconnected_state() {
    let manager = ConnectionManager::new(
        ScriptedDriver::with_script(&[true, false, true]),
        test_config(5),
    );
    manager.connect().await.unwrap();
    manager.driver().emit(DriverEvent::Disconnected);
    settle().await;

    let timed_out = tokio::time::timeout(Duration::from_millis(500), manager.connect()).await;
    assert!(timed_out.is_err());
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // Disconnect does not wait on the abandoned sequence
    let closed = tokio::time::timeout(Duration::from_secs(1), manager.disconnect()).await;
    assert!(closed.is_ok());
}
