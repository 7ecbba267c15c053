use cloakscope_db::DatabaseError;
use cloakscope_probe::{ProbeError, UrlRejection};
use thiserror::Error;

/// Message reported when a URL fails the outbound safety check.
pub const BLOCKED_URL_MESSAGE: &str = "Invalid or internal URL blocked for security reasons";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid or internal URL blocked for security reasons ({0})")]
    Blocked(#[from] UrlRejection),

    #[error("Target {0} not found")]
    TargetNotFound(String),

    #[error("Audit {0} not found")]
    AuditNotFound(String),

    #[error("Unknown audit module '{0}'")]
    UnknownModule(String),

    #[error("Invalid audit configuration: {0}")]
    InvalidConfig(String),

    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_message_prefix() {
        let err: ScanError = UrlRejection::MissingHost.into();
        assert!(err.to_string().starts_with(BLOCKED_URL_MESSAGE));
    }
}
