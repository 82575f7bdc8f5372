//! HTTP Handlers

use super::types::*;
use crate::api_keys::ApiKeyStore;
use crate::db::ConnectionStatus;
use crate::metrics::Metrics;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::SystemTime;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub connection: Arc<dyn ConnectionStatus>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub metrics: Arc<Metrics>,
    pub start_time: SystemTime,
}

impl AppState {
    pub fn new(
        connection: Arc<dyn ConnectionStatus>,
        api_keys: Arc<dyn ApiKeyStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            connection,
            api_keys,
            metrics,
            start_time: SystemTime::now(),
        }
    }
}

/// Health check handler
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    let uptime = SystemTime::now()
        .duration_since(state.start_time)
        .unwrap_or_default()
        .as_secs();

    let database = if state.connection.is_connected() {
        "connected"
    } else {
        "disconnected"
    };

    Json(HealthStatus {
        status: "success",
        message: "Server is healthy".to_string(),
        database,
        uptime_seconds: uptime,
    })
}

/// Prometheus scrape endpoint
pub async fn export_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.export_prometheus(),
    )
}

/// Fallback for unknown routes
pub async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Counts every request passing through the router
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    metrics.record_http_request();
    next.run(request).await
}
