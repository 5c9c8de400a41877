//! API error taxonomy and its HTTP mapping.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use remotes_core::DatabaseError;
use remotes_crypto::CryptoError;
use remotes_proto::v1::{ErrorBody, Status};
use tracing::error;

/// Errors returned by the enrollment and command exchange operations.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or malformed field.
    #[error("{0}")]
    Validation(String),

    /// Per-field validation messages.
    #[error("Invalid fields: {0:?}")]
    InvalidFields(BTreeMap<String, Vec<String>>),

    /// Signature or credential mismatch.
    #[error("{0}")]
    Authentication(String),

    /// Authenticated, but not entitled to the resource.
    #[error("{0}")]
    Authorization(String),

    /// Duplicate identity or registration.
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    /// Detail is never sent to the caller.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Conflict(msg) => Self::Conflict(msg),
            DatabaseError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidFields(_) | Self::Crypto(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Authorization(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the caller. Crypto and internal failures stay generic.
    pub fn body(&self) -> ErrorBody {
        match self {
            Self::InvalidFields(fields) => ErrorBody {
                status: Status::Error,
                message: None,
                fields: fields.clone(),
            },
            Self::Crypto(_) => ErrorBody::message("Invalid encrypted data"),
            Self::Internal(_) => ErrorBody::message("Internal server error"),
            Self::Validation(msg)
            | Self::Authentication(msg)
            | Self::Authorization(msg)
            | Self::Conflict(msg)
            | Self::NotFound(msg) => ErrorBody::message(msg.clone()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "Request failed");
        }
        (self.status_code(), Json(self.body())).into_response()
    }
}

/// Enrollment answers every rejected request with 400 and the same body
/// shape, whatever the underlying kind.
#[derive(Debug)]
pub struct EnrollmentRejection(pub ApiError);

impl From<ApiError> for EnrollmentRejection {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl IntoResponse for EnrollmentRejection {
    fn into_response(self) -> Response {
        match self.0 {
            inner @ ApiError::Internal(_) => inner.into_response(),
            inner => (StatusCode::BAD_REQUEST, Json(inner.body())).into_response(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ApiError::Validation("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Authentication("x".into()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Authorization("x".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Crypto(CryptoError::DecryptionFailed).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn internal_detail_is_not_exposed() {
        let body = ApiError::Internal("disk I/O error at /var/db".into()).body();
        assert_eq!(body.message.as_deref(), Some("Internal server error"));
    }

    #[test]
    fn database_conflict_becomes_conflict() {
        let err: ApiError = DatabaseError::Conflict("UNIQUE constraint failed".into()).into();
        assert!(matches!(err, ApiError::Conflict(_)));
        let err: ApiError = DatabaseError::Query("boom".into()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }

    #[test]
    fn enrollment_rejection_is_always_400() {
        let resp = EnrollmentRejection(ApiError::Authentication("Invalid signature".into()))
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = EnrollmentRejection(ApiError::Internal("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
