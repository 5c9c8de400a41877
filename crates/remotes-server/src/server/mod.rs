//! HTTP API.
//!
//! `build_router` mounts every endpoint on an axum router wrapped in a
//! tracing layer. Handlers are thin: they authenticate through the
//! extractors in [`crate::auth`] and delegate to [`crate::enrollment`] and
//! [`crate::exchange`].

mod commands_api;
mod host_api;
mod status_api;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use remotes_proto::endpoints;
use tower_http::trace::TraceLayer;

use crate::storage::ServerDatabase;

/// Static server identity reported by `GET /api/status`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub app_name: String,
    pub version: String,
    /// Fallback public URL when no `server_url` setting is stored.
    pub server_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: "Remotes".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            server_url: "http://localhost:8000".to_string(),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: ServerDatabase,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: ServerDatabase, config: ServerConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(endpoints::API_STATUS, get(status_api::server_status))
        .route(endpoints::DISCOVER, get(status_api::discover))
        .route(endpoints::PING, get(host_api::ping))
        .route(endpoints::HOST_REGISTER, post(host_api::register))
        .route(endpoints::HOST_VERIFY, post(host_api::verify))
        .route(endpoints::HOST_STATUS, get(host_api::host_status))
        .route(endpoints::COMMANDS_LIST, get(commands_api::list))
        .route(
            &format!("{}/{{id}}", endpoints::COMMAND_GET),
            get(commands_api::fetch),
        )
        .route(
            &format!("{}/{{id}}", endpoints::COMMAND_POST),
            post(commands_api::post),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
