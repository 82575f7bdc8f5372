//! HTTP Server

use super::{api::HttpApi, handlers::AppState};
use crate::{config::ApiConfig, Result};
use anyhow::Context;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// HTTP application server
pub struct HttpServer {
    bind_addr: SocketAddr,
    app_state: AppState,
    api_config: ApiConfig,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(bind_addr: SocketAddr, app_state: AppState, api_config: ApiConfig) -> Self {
        Self {
            bind_addr,
            app_state,
            api_config,
        }
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = HttpApi::create_router(self.app_state, &self.api_config);

        let listener = TcpListener::bind(self.bind_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", self.bind_addr))?;

        info!("Server running on {}", self.bind_addr);

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Server error: {}", e);
            return Err(e.into());
        }

        info!("HTTP server stopped");
        Ok(())
    }

    /// Create a router for testing
    pub fn create_test_router(&self) -> Router {
        HttpApi::create_router(self.app_state.clone(), &self.api_config)
    }
}
