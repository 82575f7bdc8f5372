//! HTTP Types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::api_keys::{ApiKey, Permission};

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub message: String,
    pub database: &'static str,
    pub uptime_seconds: u64,
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub code: u16,
    pub message: String,
}

/// Authenticated caller, inserted into request extensions by the gate
#[derive(Debug, Clone)]
pub struct ApiKeyContext {
    pub key: String,
    pub permissions: Vec<Permission>,
}

impl From<ApiKey> for ApiKeyContext {
    fn from(api_key: ApiKey) -> Self {
        Self {
            key: api_key.key,
            permissions: api_key.permissions,
        }
    }
}

/// Errors rendered as JSON error responses
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Database unavailable")]
    ServiceUnavailable,

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            error!(error = %detail, "Request failed");
        }

        let status = self.status_code();
        let body = ErrorBody {
            status: "error",
            code: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
