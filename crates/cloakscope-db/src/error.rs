//! Database error types.
//!
//! Provides comprehensive error handling for database operations using `thiserror`.

use thiserror::Error;

/// Database-specific errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to open or create database connection.
    #[error("failed to open database: {0}")]
    Open(String),

    /// Migration execution failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// Requested record was not found.
    #[error("record not found")]
    NotFound,

    /// Database record with provided identifier not found.
    #[error("{0}")]
    NotFoundWithMessage(String),

    /// Update refused because the record is already in a terminal state.
    #[error("{0}")]
    Conflict(String),

    /// Failed to decode database value.
    #[error("decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Underlying `SQLx` error.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<cloakscope_scheduler::UnknownVariant> for DatabaseError {
    fn from(err: cloakscope_scheduler::UnknownVariant) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<cloakscope_core::CoreError> for DatabaseError {
    fn from(err: cloakscope_core::CoreError) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias for database operations.
pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_with_message() {
        let err = DatabaseError::NotFoundWithMessage("Target 't-1' not found".to_string());
        assert_eq!(err.to_string(), "Target 't-1' not found");
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
        let err: DatabaseError = json_err.into();
        assert!(matches!(err, DatabaseError::SerializationError(_)));
    }
}
