//! HTTP Routes

use super::{
    auth::{api_key_middleware, ApiKeyGate},
    handlers::*,
};
use crate::config::ApiConfig;
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::Level;
use uuid::Uuid;

/// Hardening headers added to every response unless a handler set them
const SECURITY_HEADERS: [(&str, &str); 9] = [
    ("content-security-policy", "default-src 'self'; frame-ancestors 'self'; object-src 'none'"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
];

/// Application router
pub struct HttpApi;

impl HttpApi {
    /// Create the application router
    pub fn create_router(state: AppState, api_config: &ApiConfig) -> Router {
        let gate = Arc::new(ApiKeyGate::new(state.api_keys.clone(), api_config.enabled));

        // Routes behind the API-key gate
        let api_routes = Router::new()
            .route("/health", get(health_check))
            .layer(middleware::from_fn_with_state(gate, api_key_middleware));

        let metrics = state.metrics.clone();

        let router = Router::new()
            .nest("/api", api_routes)
            .route("/metrics", get(export_metrics))
            .fallback(not_found)
            .with_state(state)
            .layer(middleware::from_fn_with_state(metrics, track_requests));

        Self::with_security_headers(router)
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|request: &Request| {
                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            uri = %request.uri(),
                            request_id = %Uuid::new_v4(),
                        )
                    })
                    .on_response(
                        DefaultOnResponse::new()
                            .level(Level::INFO)
                            .latency_unit(LatencyUnit::Millis),
                    ),
            )
    }

    fn with_security_headers(router: Router) -> Router {
        SECURITY_HEADERS.iter().fold(router, |router, &(name, value)| {
            router.layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            ))
        })
    }
}
