//! Enrollment and host identity endpoints.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use remotes_proto::v1::{
    EncryptedResponse, HostStatusResponse, HostsGroupRef, PingResponse, RegisterRequest, Status,
    VerifyRequest,
};
use tracing::instrument;

use super::AppState;
use crate::auth::{HostCaller, RegistrarCaller};
use crate::enrollment;
use crate::error::{ApiError, EnrollmentRejection};

/// `POST /api/v1/host/register`
#[instrument(skip_all, fields(registrar = %caller.user.username))]
pub async fn register(
    caller: RegistrarCaller,
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<EncryptedResponse>, EnrollmentRejection> {
    let Json(request) = body.map_err(ApiError::from)?;
    let registration = enrollment::register(&state.db, &request).await?;
    Ok(Json(EncryptedResponse {
        status: Status::Ok,
        encrypted: registration.encrypted_uuid,
    }))
}

/// `POST /api/v1/host/verify`
#[instrument(skip_all, fields(registrar = %caller.user.username))]
pub async fn verify(
    caller: RegistrarCaller,
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Result<Json<EncryptedResponse>, EnrollmentRejection> {
    let Json(request) = body.map_err(ApiError::from)?;
    let verification = enrollment::verify(&state.db, &request).await?;
    Ok(Json(EncryptedResponse {
        status: Status::Ok,
        encrypted: verification.encrypted_token,
    }))
}

/// `GET /api/v1/ping`
pub async fn ping(_caller: HostCaller) -> Json<PingResponse> {
    Json(PingResponse { status: Status::Ok })
}

/// `GET /api/v1/host/status`
pub async fn host_status(
    caller: HostCaller,
    State(state): State<AppState>,
) -> Result<Json<HostStatusResponse>, ApiError> {
    let groups = state.db.list_host_groups(caller.host.id).await?;
    Ok(Json(HostStatusResponse {
        status: Status::Ok,
        id: caller.host.id,
        user_id: caller.user.id,
        user_name: caller.user.username,
        hosts_groups: groups
            .into_iter()
            .map(|g| HostsGroupRef {
                id: g.id,
                name: g.name,
            })
            .collect(),
    }))
}
