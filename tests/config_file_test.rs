//! Configuration file loading tests

use restbase::config::{ConfigManager, Environment};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_partial_file_keeps_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
environment = "production"

[server]
bind_addr = "127.0.0.1:8088"

[database]
uri = "mongodb://mongo-0:27017,mongo-1:27017/?replicaSet=rs0"

[database.connection]
max_attempts = 3
initial_delay = "500ms"
reconnect_grace = "2s"
db_name = "orders"
"#
    )
    .unwrap();

    let config = ConfigManager::load_from_file(file.path()).unwrap();

    assert_eq!(config.environment, Environment::Production);
    assert_eq!(config.server.bind_addr, "127.0.0.1:8088".parse().unwrap());
    assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));

    let connection = &config.database.connection;
    assert_eq!(connection.max_attempts, 3);
    assert_eq!(connection.initial_delay, Duration::from_millis(500));
    assert_eq!(connection.max_delay, Duration::from_secs(30));
    assert_eq!(connection.reconnect_grace, Duration::from_secs(2));
    assert_eq!(connection.db_name, "orders");
    assert_eq!(connection.max_pool_size, 10);
    assert!(config.api.enabled);
}

#[test]
fn test_invalid_file_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[database.connection]
min_pool_size = 50
max_pool_size = 10
"#
    )
    .unwrap();

    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[test]
fn test_malformed_duration_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[database.connection]
initial_delay = "soon"
"#
    )
    .unwrap();

    assert!(ConfigManager::load_from_file(file.path()).is_err());
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.database.uri, "mongodb://localhost:27017");
    assert_eq!(config.database.connection.max_attempts, 5);
}

fn lookup_from(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
    move |key| {
        pairs
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
    }
}

#[test]
fn test_file_and_environment_are_layered() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[server]
bind_addr = "127.0.0.1:8088"

[database.connection]
db_name = "from-file"
"#
    )
    .unwrap();

    let config = ConfigManager::load_with_lookup(
        file.path(),
        lookup_from(&[
            ("MONGODB_URI", "mongodb://mongo-env:27017"),
            ("MONGO_USER", "svc"),
            ("MONGO_PASS", "hunter2"),
            ("MONGO_DB_NAME", "from-env"),
            ("PORT", "9000"),
            ("MONGO_MAX_ATTEMPTS", "7"),
        ]),
    )
    .unwrap();

    // Only set in the environment
    assert_eq!(config.database.uri, "mongodb://mongo-env:27017");
    assert_eq!(config.database.username.as_deref(), Some("svc"));
    assert_eq!(config.database.password.as_deref(), Some("hunter2"));
    assert_eq!(config.database.connection.max_attempts, 7);

    // Set in both; the file wins
    assert_eq!(config.server.bind_addr, "127.0.0.1:8088".parse().unwrap());
    assert_eq!(config.database.connection.db_name, "from-file");

    // Set in neither
    assert_eq!(config.database.connection.reconnect_grace, Duration::from_secs(5));
}

#[test]
fn test_environment_applies_without_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConfigManager::load_with_lookup(
        &dir.path().join("absent.toml"),
        lookup_from(&[("MONGODB_URI", "mongodb://mongo-env:27017"), ("APP_ENV", "production")]),
    )
    .unwrap();

    assert_eq!(config.database.uri, "mongodb://mongo-env:27017");
    assert_eq!(config.environment, Environment::Production);
}
