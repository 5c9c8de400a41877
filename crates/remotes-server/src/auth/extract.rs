//! Axum extractors resolving the caller behind a bearer token.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use super::token::{bearer_token, hash_token};
use crate::error::ApiError;
use crate::server::AppState;
use crate::storage::{Host, User};

async fn authenticated_user(parts: &Parts, state: &AppState) -> Result<User, ApiError> {
    let token = bearer_token(&parts.headers)
        .ok_or_else(|| ApiError::Authentication("Missing authorization header".into()))?;
    state
        .db
        .get_user_by_token_hash(&hash_token(token))
        .await?
        .ok_or_else(|| ApiError::Authentication("Invalid token".into()))
}

/// An enrolled, active host calling with its own token.
#[derive(Debug, Clone)]
pub struct HostCaller {
    pub user: User,
    pub host: Host,
}

impl FromRequestParts<AppState> for HostCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = authenticated_user(parts, state).await?;
        let host = state
            .db
            .get_active_host_for_user(user.id)
            .await?
            .ok_or_else(|| {
                debug!(user_id = user.id, "Token has no active host");
                ApiError::Authorization("No active host for this token".into())
            })?;
        Ok(Self { user, host })
    }
}

/// A caller holding the host-registration capability.
#[derive(Debug, Clone)]
pub struct RegistrarCaller {
    pub user: User,
}

impl FromRequestParts<AppState> for RegistrarCaller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = authenticated_user(parts, state).await?;
        if !user.can_register_hosts {
            return Err(ApiError::Authorization(
                "Token is not allowed to register hosts".into(),
            ));
        }
        Ok(Self { user })
    }
}
