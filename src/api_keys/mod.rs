//! API Keys Module
//!
//! Model and lookup stores backing the `x-api-key` request gate.

pub mod model;
pub mod store;

pub use model::{ApiKey, Permission, API_KEYS_COLLECTION};
pub use store::{ApiKeyStore, MongoApiKeyStore, StaticApiKeyStore};
