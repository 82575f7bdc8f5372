//! API Key Stores

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::doc;
use tracing::debug;

use super::model::{ApiKey, API_KEYS_COLLECTION};
use crate::db::{ConnectionManager, DbError, MongoDriver};

/// Lookup of active API keys
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Find an active key; `Ok(None)` when unknown or revoked
    async fn find_active(&self, key: &str) -> Result<Option<ApiKey>, DbError>;
}

/// Looks keys up in MongoDB through the connection manager
pub struct MongoApiKeyStore {
    manager: Arc<ConnectionManager<MongoDriver>>,
}

impl MongoApiKeyStore {
    pub fn new(manager: Arc<ConnectionManager<MongoDriver>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ApiKeyStore for MongoApiKeyStore {
    async fn find_active(&self, key: &str) -> Result<Option<ApiKey>, DbError> {
        // Resolved per lookup; a handle may be invalidated by a disconnect
        let handle = self.manager.get_connection()?;
        let collection = handle.database().collection::<ApiKey>(API_KEYS_COLLECTION);

        let found = collection
            .find_one(doc! { "key": key, "status": true })
            .await
            .map_err(DbError::driver)?;

        debug!(found = found.is_some(), "API key lookup");
        Ok(found)
    }
}

/// Fixed in-memory key set
#[derive(Debug, Default, Clone)]
pub struct StaticApiKeyStore {
    keys: HashMap<String, ApiKey>,
}

impl StaticApiKeyStore {
    pub fn new(keys: impl IntoIterator<Item = ApiKey>) -> Self {
        Self {
            keys: keys.into_iter().map(|k| (k.key.clone(), k)).collect(),
        }
    }
}

#[async_trait]
impl ApiKeyStore for StaticApiKeyStore {
    async fn find_active(&self, key: &str) -> Result<Option<ApiKey>, DbError> {
        Ok(self.keys.get(key).filter(|k| k.status).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_keys::Permission;
    use crate::db::ConnectionConfig;

    #[tokio::test]
    async fn test_static_store_skips_revoked_keys() {
        let mut revoked = ApiKey::new("revoked", vec![Permission::General]);
        revoked.status = false;
        let store = StaticApiKeyStore::new([
            ApiKey::new("active", vec![Permission::Admin]),
            revoked,
        ]);

        assert!(store.find_active("active").await.unwrap().is_some());
        assert!(store.find_active("revoked").await.unwrap().is_none());
        assert!(store.find_active("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mongo_store_requires_connection() {
        let manager = ConnectionManager::new(
            MongoDriver::new("mongodb://localhost:27017"),
            ConnectionConfig::default(),
        );
        let store = MongoApiKeyStore::new(manager);

        let err = store.find_active("anything").await.unwrap_err();
        assert!(err.is_not_connected());
    }
}
