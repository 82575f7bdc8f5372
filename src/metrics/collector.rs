//! Metrics Collector

use prometheus::{Counter, Gauge, Registry, TextEncoder};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Collects and exports metrics
pub struct Metrics {
    prometheus_registry: Registry,

    // Prometheus metrics
    db_connect_attempts_total: Counter,
    db_connect_failures_total: Counter,
    db_reconnects_scheduled_total: Counter,
    db_connected: Gauge,
    http_requests_total: Counter,

    // Internal counters
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    reconnects_scheduled: AtomicU64,
    http_requests: AtomicU64,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let prometheus_registry = Registry::new();

        let db_connect_attempts_total = Counter::new(
            "restbase_db_connect_attempts_total",
            "Total database connection attempts"
        ).expect("Failed to create db_connect_attempts_total counter");

        let db_connect_failures_total = Counter::new(
            "restbase_db_connect_failures_total",
            "Total failed database connection attempts"
        ).expect("Failed to create db_connect_failures_total counter");

        let db_reconnects_scheduled_total = Counter::new(
            "restbase_db_reconnects_scheduled_total",
            "Total automatic reconnects scheduled after a disconnect"
        ).expect("Failed to create db_reconnects_scheduled_total counter");

        let db_connected = Gauge::new(
            "restbase_db_connected",
            "1 while the database connection is usable, 0 otherwise"
        ).expect("Failed to create db_connected gauge");

        let http_requests_total = Counter::new(
            "restbase_http_requests_total",
            "Total HTTP requests served"
        ).expect("Failed to create http_requests_total counter");

        // Register metrics
        prometheus_registry.register(Box::new(db_connect_attempts_total.clone()))
            .expect("Failed to register db_connect_attempts_total");
        prometheus_registry.register(Box::new(db_connect_failures_total.clone()))
            .expect("Failed to register db_connect_failures_total");
        prometheus_registry.register(Box::new(db_reconnects_scheduled_total.clone()))
            .expect("Failed to register db_reconnects_scheduled_total");
        prometheus_registry.register(Box::new(db_connected.clone()))
            .expect("Failed to register db_connected");
        prometheus_registry.register(Box::new(http_requests_total.clone()))
            .expect("Failed to register http_requests_total");

        Self {
            prometheus_registry,
            db_connect_attempts_total,
            db_connect_failures_total,
            db_reconnects_scheduled_total,
            db_connected,
            http_requests_total,
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            reconnects_scheduled: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
        }
    }

    pub fn record_connect_attempt(&self) {
        self.db_connect_attempts_total.inc();
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.db_connect_failures_total.inc();
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_scheduled(&self) {
        self.db_reconnects_scheduled_total.inc();
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_db_connected(&self, connected: bool) {
        self.db_connected.set(if connected { 1.0 } else { 0.0 });
    }

    pub fn record_http_request(&self) {
        self.http_requests_total.inc();
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }

    pub fn get_connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn get_connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }

    pub fn get_reconnects_scheduled(&self) -> u64 {
        self.reconnects_scheduled.load(Ordering::Relaxed)
    }

    pub fn get_http_requests(&self) -> u64 {
        self.http_requests.load(Ordering::Relaxed)
    }

    pub fn is_db_connected(&self) -> bool {
        self.db_connected.get() > 0.0
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
