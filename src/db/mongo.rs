//! MongoDB Store Driver
//!
//! Opens a `mongodb::Client` configured from [`ConnectionConfig`] and turns the
//! driver's server-monitoring heartbeats into [`DriverEvent`]s.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::event::sdam::SdamEvent;
use mongodb::event::EventHandler;
use mongodb::options::{ClientOptions, Credential};
use mongodb::{Client, Database};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use super::driver::{DriverEvent, DriverSession, StoreDriver};
use super::{ConnectionConfig, DbError};

const HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);

/// Live MongoDB handle: the client and its default database
#[derive(Debug, Clone)]
pub struct MongoHandle {
    client: Client,
    database: Database,
}

impl MongoHandle {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

/// [`StoreDriver`] backed by the official `mongodb` crate
pub struct MongoDriver {
    uri: String,
    app_name: Option<String>,
    credential: Option<Credential>,
}

impl MongoDriver {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            app_name: None,
            credential: None,
        }
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Authenticate with explicit credentials instead of the URI's
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let mut credential = Credential::default();
        credential.username = Some(username.into());
        credential.password = Some(password.into());
        self.credential = Some(credential);
        self
    }

    async fn client_options(
        &self,
        config: &ConnectionConfig,
        events: mpsc::UnboundedSender<DriverEvent>,
    ) -> Result<ClientOptions, DbError> {
        let mut options = ClientOptions::parse(self.uri.as_str())
            .await
            .map_err(|e| DbError::Driver(format!("Failed to parse MongoDB options: {}", e)))?;

        options.app_name = self.app_name.clone();
        options.min_pool_size = Some(config.min_pool_size);
        options.max_pool_size = Some(config.max_pool_size);
        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.connect_timeout);
        options.heartbeat_freq = Some(HEARTBEAT_FREQUENCY);
        options.retry_writes = Some(true);
        options.retry_reads = Some(true);
        options.default_database = Some(config.db_name.clone());
        if let Some(credential) = &self.credential {
            options.credential = Some(credential.clone());
        }

        let monitor = HeartbeatMonitor::new(events);
        options.sdam_event_handler = Some(EventHandler::callback(move |event| monitor.observe(event)));

        Ok(options)
    }
}

#[async_trait]
impl StoreDriver for MongoDriver {
    type Handle = MongoHandle;

    #[instrument(skip_all, fields(db_name = %config.db_name))]
    async fn open(&self, config: &ConnectionConfig) -> Result<DriverSession<MongoHandle>, DbError> {
        debug!("connecting to MongoDB");

        let (tx, rx) = mpsc::unbounded_channel();
        let options = self.client_options(config, tx).await?;
        let client = Client::with_options(options)
            .map_err(|e| DbError::Driver(format!("Failed to create MongoDB client: {}", e)))?;
        let database = client.database(&config.db_name);

        // The client connects lazily; a ping proves a server is reachable
        let ping = database.run_command(doc! { "ping": 1 });
        match tokio::time::timeout(config.socket_timeout, ping).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                client.shutdown().await;
                return Err(DbError::Driver(format!("Failed to connect to MongoDB: {}", e)));
            }
            Err(_) => {
                client.shutdown().await;
                return Err(DbError::Driver(format!(
                    "MongoDB ping timed out after {:?}",
                    config.socket_timeout
                )));
            }
        }

        Ok(DriverSession::new(MongoHandle { client, database }, rx))
    }

    async fn close(&self, handle: MongoHandle) -> Result<(), DbError> {
        handle.client.shutdown().await;
        Ok(())
    }
}

/// Tracks which servers answered their last heartbeat and reports when the
/// whole deployment becomes unreachable or reachable again.
struct HeartbeatMonitor {
    events: mpsc::UnboundedSender<DriverEvent>,
    healthy: Mutex<HashSet<String>>,
}

impl HeartbeatMonitor {
    fn new(events: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self {
            events,
            healthy: Mutex::new(HashSet::new()),
        }
    }

    fn observe(&self, event: SdamEvent) {
        match event {
            SdamEvent::ServerHeartbeatSucceeded(event) => {
                self.mark(event.server_address.to_string(), true);
            }
            SdamEvent::ServerHeartbeatFailed(event) => {
                debug!(server = %event.server_address, error = %event.failure, "Heartbeat failed");
                self.fail(event.server_address.to_string(), event.failure.to_string());
            }
            _ => {}
        }
    }

    /// Report the first failed heartbeat of a previously healthy server
    fn fail(&self, server: String, failure: String) {
        if self.lock().contains(&server) {
            let _ = self.events.send(DriverEvent::Error(format!(
                "Lost contact with {}: {}",
                server, failure
            )));
        }
        self.mark(server, false);
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.healthy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mark(&self, server: String, reachable: bool) {
        let mut healthy = self.lock();
        let was_reachable = !healthy.is_empty();
        if reachable {
            healthy.insert(server);
        } else {
            healthy.remove(&server);
        }
        let is_reachable = !healthy.is_empty();

        let event = match (was_reachable, is_reachable) {
            (true, false) => DriverEvent::Disconnected,
            (false, true) => DriverEvent::Connected,
            _ => return,
        };
        // The receiver is gone once the handle has been replaced or closed
        let _ = self.events.send(event);
    }
}
