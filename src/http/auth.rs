//! API-Key Gate

use super::types::{ApiError, ApiKeyContext, API_KEY_HEADER};
use crate::api_keys::ApiKeyStore;
use crate::db::DbError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Checks the `x-api-key` header against an [`ApiKeyStore`]
pub struct ApiKeyGate {
    store: Arc<dyn ApiKeyStore>,
    enabled: bool,
}

impl ApiKeyGate {
    pub fn new(store: Arc<dyn ApiKeyStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    /// Resolve the caller for a presented key.
    ///
    /// `None` when the gate is disabled.
    pub async fn authenticate(&self, presented: Option<&str>) -> Result<Option<ApiKeyContext>, ApiError> {
        if !self.enabled {
            debug!("API-key gate disabled, allowing request");
            return Ok(None);
        }

        let key = presented
            .filter(|key| !key.is_empty())
            .ok_or(ApiError::Forbidden)?;

        match self.store.find_active(key).await {
            Ok(Some(api_key)) => Ok(Some(ApiKeyContext::from(api_key))),
            Ok(None) => {
                warn!("Rejected request with unknown API key");
                Err(ApiError::BadRequest("No api key found".to_string()))
            }
            Err(e @ (DbError::NotConnected | DbError::ShuttingDown)) => {
                warn!(error = %e, "API key lookup without a database connection");
                Err(ApiError::ServiceUnavailable)
            }
            Err(e) => Err(ApiError::Internal(format!("API key lookup failed: {}", e))),
        }
    }
}

/// Authentication middleware function
pub async fn api_key_middleware(
    State(gate): State<Arc<ApiKeyGate>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    if let Some(context) = gate.authenticate(presented.as_deref()).await? {
        request.extensions_mut().insert(context);
    }

    Ok(next.run(request).await)
}
