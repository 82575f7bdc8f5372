//! Database Module
//!
//! Owns the connection lifecycle to the backing store: retry with backoff,
//! disconnect detection, automatic reconnection and coordinated shutdown.

pub mod backoff;
pub mod driver;
pub mod error;
pub mod manager;
pub mod mongo;

pub use backoff::BackoffSchedule;
pub use driver::{DriverEvent, DriverSession, StoreDriver};
pub use error::DbError;
pub use manager::{ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStatus};
pub use mongo::{MongoDriver, MongoHandle};
