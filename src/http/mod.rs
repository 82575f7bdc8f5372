//! HTTP Module
//! 
//! axum application: middleware stack, API-key gate, health and metrics routes.

pub mod api;
pub mod auth;
pub mod handlers;
pub mod server;
pub mod types;

pub use api::HttpApi;
pub use auth::ApiKeyGate;
pub use handlers::AppState;
pub use server::HttpServer;
pub use types::*;
