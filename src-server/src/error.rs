//! Error responses for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cloakscope_auth::AuthError;
use cloakscope_db::DatabaseError;
use cloakscope_scanner::{ScanError, BLOCKED_URL_MESSAGE};
use serde::Serialize;

/// Error returned to HTTP callers as `{ "error": ..., "code": ... }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Response status
    pub status: StatusCode,
    /// Stable machine-readable code (e.g. `"UNAUTHORIZED"`)
    pub code: &'static str,
    /// Human-readable message
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
}

impl ApiError {
    /// 400
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    /// 401
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    /// 404
    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    /// 500
    pub fn internal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{} {}: {}", self.status, self.code, self.message);
        } else {
            tracing::warn!("{} {}: {}", self.status, self.code, self.message);
        }
        let body = ErrorBody {
            error: &self.message,
            code: self.code,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let code = match &err {
            AuthError::MissingCredentials => "MISSING_CREDENTIALS",
            AuthError::MalformedSignature(_) | AuthError::InvalidSignature => "INVALID_SIGNATURE",
            AuthError::StaleTimestamp { .. } => "STALE_TIMESTAMP",
            AuthError::SignatureDisabled => "SIGNATURE_DISABLED",
            AuthError::InvalidSession(_) | AuthError::IdentityUnavailable(_) => "INVALID_SESSION",
        };
        Self::unauthorized(code, err.to_string())
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Blocked(_) => Self::bad_request("BLOCKED_URL", BLOCKED_URL_MESSAGE),
            ScanError::TargetNotFound(_) => Self::not_found("TARGET_NOT_FOUND", err.to_string()),
            ScanError::AuditNotFound(_) => Self::not_found("AUDIT_NOT_FOUND", err.to_string()),
            ScanError::UnknownModule(_) | ScanError::InvalidConfig(_) => {
                Self::bad_request("INVALID_AUDIT_CONFIG", err.to_string())
            }
            ScanError::Probe(_) => Self::internal("PROBE_ERROR", err.to_string()),
            ScanError::Database(_) | ScanError::Sqlx(_) => {
                Self::internal("DATABASE_ERROR", err.to_string())
            }
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        Self::internal("DATABASE_ERROR", err.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        Self::internal("DATABASE_ERROR", format!("database error: {err}"))
    }
}
