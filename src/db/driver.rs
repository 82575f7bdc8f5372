//! Store Driver Seam
//!
//! The connection manager never talks to a database client directly. It drives a
//! [`StoreDriver`], which opens handles and publishes asynchronous lifecycle
//! notifications into a channel handed back with each handle.

use super::{ConnectionConfig, DbError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Asynchronous lifecycle notification published by a driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// The handle regained a reachable server on its own
    Connected,
    /// The handle lost every reachable server
    Disconnected,
    /// A non-fatal error worth logging
    Error(String),
}

/// A freshly opened handle together with its event stream
#[derive(Debug)]
pub struct DriverSession<H> {
    pub handle: H,
    pub events: mpsc::UnboundedReceiver<DriverEvent>,
}

impl<H> DriverSession<H> {
    pub fn new(handle: H, events: mpsc::UnboundedReceiver<DriverEvent>) -> Self {
        Self { handle, events }
    }
}

/// Backing store driver used by [`super::ConnectionManager`]
#[async_trait]
pub trait StoreDriver: Send + Sync + 'static {
    /// Live, cheaply clonable connection handle
    type Handle: Clone + Send + Sync + 'static;

    /// Make a single connection attempt.
    ///
    /// Returns only once the store is reachable; the manager owns retries.
    async fn open(&self, config: &ConnectionConfig) -> Result<DriverSession<Self::Handle>, DbError>;

    /// Close a handle previously returned by [`StoreDriver::open`]
    async fn close(&self, handle: Self::Handle) -> Result<(), DbError>;
}
