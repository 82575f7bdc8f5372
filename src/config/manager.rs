//! Configuration Manager

use super::{Config, Environment};
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from the process environment and an optional file.
    ///
    /// Values in the file win over environment variables, which win over
    /// built-in defaults.
    pub fn load(path: &Path) -> Result<Config> {
        Self::load_with_lookup(path, |key| std::env::var(key).ok())
    }

    /// Load configuration from file alone, ignoring the environment
    pub fn load_from_file(path: &Path) -> Result<Config> {
        Self::load_with_lookup(path, |_| None)
    }

    /// Layer the file, if present, over the variables resolved by `lookup`
    pub fn load_with_lookup<F>(path: &Path, lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = Self::from_lookup(lookup)?;

        let config = if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let overlay: toml::Table = content.parse()
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            let mut merged = toml::Value::try_from(&base)
                .context("Failed to serialize base configuration")?;
            merge_toml(&mut merged, toml::Value::Table(overlay));

            merged.try_into::<Config>()
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            tracing::warn!("Configuration file not found at {}, using environment and defaults", path.display());
            base
        };

        config.validate()
            .with_context(|| "Configuration validation failed")?;

        tracing::info!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Build a configuration from defaults overridden by the given variables
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(env) = lookup("APP_ENV") {
            config.environment = env.parse::<Environment>()
                .with_context(|| format!("Invalid APP_ENV: {}", env))?;
        }

        if let Some(port) = lookup("PORT") {
            let port = port.parse::<u16>()
                .with_context(|| format!("Invalid PORT: {}", port))?;
            config.server.bind_addr.set_port(port);
        }

        if let Some(uri) = lookup("MONGODB_URI") {
            config.database.uri = uri;
        }

        if let Some(user) = lookup("MONGO_USER") {
            config.database.username = Some(user);
        }

        if let Some(pass) = lookup("MONGO_PASS") {
            config.database.password = Some(pass);
        }

        if let Some(db_name) = lookup("MONGO_DB_NAME") {
            config.database.connection.db_name = db_name;
        }

        if let Some(attempts) = lookup("MONGO_MAX_ATTEMPTS") {
            config.database.connection.max_attempts = attempts.parse::<u32>()
                .with_context(|| format!("Invalid MONGO_MAX_ATTEMPTS: {}", attempts))?;
        }

        if let Some(grace) = lookup("MONGO_RECONNECT_GRACE") {
            config.database.connection.reconnect_grace = humantime::parse_duration(&grace)
                .with_context(|| format!("Invalid MONGO_RECONNECT_GRACE: {}", grace))?;
        }

        if let Some(log_level) = lookup("LOG_LEVEL") {
            config.logging.level = Some(log_level);
        }

        Ok(config)
    }
}

/// Recursively overwrite `base` with every key present in `overlay`
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_database_config()
            .with_context(|| "Database configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    /// Validate database configuration
    fn validate_database_config(&self) -> Result<()> {
        let database = &self.database;
        let connection = &database.connection;

        if database.uri.is_empty() {
            bail!("database.uri must not be empty");
        }

        if !database.uri.starts_with("mongodb://") && !database.uri.starts_with("mongodb+srv://") {
            bail!("database.uri must start with mongodb:// or mongodb+srv://");
        }

        if database.username.is_some() != database.password.is_some() {
            bail!("database.username and database.password must be set together");
        }

        if connection.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }

        if connection.initial_delay.is_zero() {
            bail!("initial_delay must be greater than 0");
        }

        if connection.initial_delay > connection.max_delay {
            bail!("initial_delay cannot exceed max_delay");
        }

        if connection.min_pool_size == 0 {
            bail!("min_pool_size must be greater than 0");
        }

        if connection.min_pool_size > connection.max_pool_size {
            bail!("min_pool_size cannot exceed max_pool_size");
        }

        if connection.db_name.is_empty() {
            bail!("db_name must not be empty");
        }

        Ok(())
    }

    /// Validate logging configuration
    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if let Some(level) = &self.logging.level {
            if !valid_log_levels.contains(&level.as_str()) {
                bail!("logging.level must be one of: {}", valid_log_levels.join(", "));
            }
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        mongodb_uri: Option<&str>,
        db_name: Option<&str>,
        no_api_key: bool,
    ) {
        // Override bind address if provided
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<std::net::SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        // Override port if provided
        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(uri) = mongodb_uri {
            self.database.uri = uri.to_string();
            tracing::info!("CLI override: database URI replaced");
        }

        if let Some(db_name) = db_name {
            self.database.connection.db_name = db_name.to_string();
            tracing::info!("CLI override: database name set to {}", db_name);
        }

        if no_api_key {
            self.api.enabled = false;
            tracing::info!("CLI override: API-key gate disabled");
        }
    }
}
