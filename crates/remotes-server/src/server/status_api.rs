//! Unauthenticated endpoints.

use axum::Json;
use axum::extract::State;
use remotes_proto::endpoints::{Endpoints, join_url};
use remotes_proto::v1::{DiscoverResponse, ServerStatus, Status};

use super::AppState;
use crate::error::ApiError;
use crate::storage::SERVER_URL;

/// `GET /api/status`
pub async fn server_status(State(state): State<AppState>) -> Result<Json<ServerStatus>, ApiError> {
    let server_url = state
        .db
        .get_setting_value(SERVER_URL)
        .await?
        .unwrap_or_else(|| state.config.server_url.clone());
    let api_url = join_url(&server_url, "api/v1/");
    Ok(Json(ServerStatus {
        status: Status::Ok,
        app_name: state.config.app_name.clone(),
        version: state.config.version.clone(),
        server_url,
        api_url,
    }))
}

/// `GET /api/v1/discover`
pub async fn discover() -> Json<DiscoverResponse> {
    Json(DiscoverResponse {
        status: Status::Ok,
        endpoints: Endpoints::default(),
    })
}
