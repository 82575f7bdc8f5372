//! API Key Model

use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

/// Collection holding API keys
pub const API_KEYS_COLLECTION: &str = "api_keys";

/// Permission granted to an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    General,
    Admin,
    SuperAdmin,
}

/// Stored API key document
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: String,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub comments: Vec<String>,
    pub version: i32,
    #[serde(default = "default_status")]
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,
}

fn default_status() -> bool {
    true
}

impl ApiKey {
    /// New active key with the given permissions
    pub fn new(key: impl Into<String>, permissions: Vec<Permission>) -> Self {
        let now = DateTime::now();
        Self {
            key: key.into(),
            permissions,
            comments: Vec::new(),
            version: 1,
            status: true,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}
