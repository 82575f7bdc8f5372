//! RestBase Library
//! 
//! HTTP service scaffold around a resilient MongoDB connection manager.
//! 
//! The database connection lifecycle lives in [`db`]: bounded exponential
//! backoff with jitter, disconnect detection, automatic reconnection and
//! coordinated shutdown. Everything else (configuration, the axum app,
//! the API-key gate, metrics) is plumbing around it.

pub mod api_keys;
pub mod config;
pub mod db;
pub mod http;
pub mod metrics;
pub mod shutdown;

pub use config::Config;
pub use db::{ConnectionConfig, ConnectionManager, ConnectionState, DbError};
pub use shutdown::ShutdownCoordinator;

/// Common error type for the service
pub type Result<T> = anyhow::Result<T>;
