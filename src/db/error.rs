//! Database Error Types

use thiserror::Error;

/// Errors surfaced by the connection manager and store drivers
#[derive(Debug, Error)]
pub enum DbError {
    /// No live handle; the manager is not in the `Connected` state
    #[error("No active database connection")]
    NotConnected,

    /// Every attempt of a single `connect()` call failed
    #[error("Failed to connect to database after {attempts} attempts")]
    ConnectExhausted {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    /// The manager has begun shutting down and accepts no further attempts
    #[error("Connection manager is shutting down")]
    ShuttingDown,

    /// Failure reported by the underlying driver
    #[error("Driver error: {0}")]
    Driver(String),

    /// Closing the connection handle failed
    #[error("Error during database disconnect: {0}")]
    Close(String),
}

impl DbError {
    pub fn driver(err: impl std::fmt::Display) -> Self {
        DbError::Driver(err.to_string())
    }

    /// Whether this is the "not connected" condition
    pub fn is_not_connected(&self) -> bool {
        matches!(self, DbError::NotConnected)
    }
}
