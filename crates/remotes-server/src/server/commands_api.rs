//! Command exchange endpoints.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use remotes_core::unix_timestamp;
use remotes_proto::v1::{
    CommandPayload, CommandPostRequest, CommandPostResponse, CommandPostResult,
    CommandsListResponse, Status,
};

use super::AppState;
use crate::auth::HostCaller;
use crate::error::ApiError;
use crate::exchange;

/// `GET /api/v1/commands/list`
pub async fn list(
    caller: HostCaller,
    State(state): State<AppState>,
) -> Result<Json<CommandsListResponse>, ApiError> {
    let results = exchange::list_pending(&state.db, &caller.host, unix_timestamp()).await?;
    Ok(Json(CommandsListResponse {
        status: Status::Ok,
        results,
    }))
}

/// `GET /api/v1/commands/get/{id}`
pub async fn fetch(
    caller: HostCaller,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CommandPayload>, ApiError> {
    let payload = exchange::fetch_command(&state.db, &caller.host, id, unix_timestamp()).await?;
    Ok(Json(payload))
}

/// `POST /api/v1/commands/post/{id}`
pub async fn post(
    caller: HostCaller,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Result<Json<CommandPostRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CommandPostResponse>), ApiError> {
    let Json(request) = body?;
    let stored = exchange::post_result(&state.db, &caller.host, id, &request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CommandPostResponse {
            status: Status::Ok,
            results: CommandPostResult {
                id: stored.command_id,
            },
        }),
    ))
}
