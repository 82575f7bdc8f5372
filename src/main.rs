//! RestBase - HTTP service scaffold with a resilient MongoDB connection manager

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use restbase::{
    api_keys::MongoApiKeyStore,
    config::{Config, ConfigManager},
    db::{ConnectionManager, MongoDriver},
    http::{AppState, HttpServer},
    metrics::Metrics,
    ShutdownCoordinator,
};

/// CLI arguments for RestBase
#[derive(Parser, Debug)]
#[command(name = "restbase")]
#[command(about = "RestBase - HTTP service scaffold with a resilient MongoDB connection")]
#[command(version)]
#[command(long_about = "
RestBase - HTTP service scaffold with a resilient MongoDB connection

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  APP_ENV                 - development, production or test
  PORT                    - HTTP port
  MONGODB_URI             - MongoDB connection string
  MONGO_USER / MONGO_PASS - MongoDB credentials
  MONGO_DB_NAME           - Database name
  MONGO_MAX_ATTEMPTS      - Connection attempts per connect
  MONGO_RECONNECT_GRACE   - Wait before reconnecting (e.g. 5s)
  LOG_LEVEL               - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "restbase.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 0.0.0.0:3000)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// MongoDB connection string (overrides config file)
    #[arg(long, help = "MongoDB connection string")]
    pub mongodb_uri: Option<String>,

    /// Database name (overrides config file)
    #[arg(long, help = "Database name")]
    pub db_name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Disable the API-key gate (overrides config file)
    #[arg(long, help = "Disable the API-key gate")]
    pub no_api_key: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = ConfigManager::load(&args.config)?;

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.mongodb_uri.as_deref(),
        args.db_name.as_deref(),
        args.no_api_key,
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&args, &config)?;

    info!("Starting RestBase v{}", env!("CARGO_PKG_VERSION"));

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Environment: {}", config.environment);
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Database: {}", config.database.connection.db_name);
        info!("  Max connect attempts: {}", config.database.connection.max_attempts);
        info!(
            "  API-key gate: {}",
            if config.api.enabled { "enabled" } else { "disabled" }
        );
        return Ok(());
    }

    info!("Environment: {}", config.environment);
    info!("Bind address: {}", config.server.bind_addr);

    let metrics = Arc::new(Metrics::new());

    let mut driver = MongoDriver::new(config.database.uri.clone())
        .with_app_name(config.database.app_name.clone());
    if let (Some(user), Some(pass)) = (&config.database.username, &config.database.password) {
        driver = driver.with_credentials(user.clone(), pass.clone());
    }

    let database = ConnectionManager::with_metrics(
        driver,
        config.database.connection.clone(),
        metrics.clone(),
    );

    // Signals received while still connecting must close the database too
    let shutdown_coordinator = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));
    shutdown_coordinator.install_signal_handlers();
    let mut shutdown_rx = shutdown_coordinator.subscribe();

    // Failing to ever connect at startup is fatal
    match shutdown_coordinator.connect_or_shutdown(&database).await {
        Ok(true) => info!("Database connection established"),
        Ok(false) => {
            info!("Shutdown completed during startup");
            return Ok(());
        }
        Err(e) => {
            error!("Failed to initialize application: {:#}", e);
            return Err(e);
        }
    }

    let app_state = AppState::new(
        database.clone(),
        Arc::new(MongoApiKeyStore::new(database.clone())),
        metrics,
    );
    let server = HttpServer::new(config.server.bind_addr, app_state, config.api.clone());

    let serve_result = server
        .serve(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await;

    info!("Shutting down server...");
    let disconnect_result = shutdown_coordinator.shutdown_database(&database).await;

    serve_result?;
    disconnect_result?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, config: &Config) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level
            .as_deref()
            .unwrap_or_else(|| config.effective_log_level())
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let fmt_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_level(true)
            .with_ansi(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}
