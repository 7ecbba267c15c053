use thiserror::Error;

/// Authentication errors. Every variant means "do not run the task".
#[derive(Debug, Error)]
pub enum AuthError {
    /// Neither signature headers nor a bearer token were supplied
    #[error("missing credentials")]
    MissingCredentials,

    /// Only one of the signature headers was supplied, or it was unreadable
    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    /// HMAC did not match
    #[error("invalid signature")]
    InvalidSignature,

    /// Timestamp outside the accepted window
    #[error("timestamp outside the {window_secs}s window (skew {skew_secs}s)")]
    StaleTimestamp {
        /// Observed clock difference
        skew_secs: i64,
        /// Accepted difference
        window_secs: i64,
    },

    /// Signed request received but no signing secret is configured
    #[error("signed requests are not enabled")]
    SignatureDisabled,

    /// Bearer token rejected by the identity service
    #[error("invalid session: {0}")]
    InvalidSession(String),

    /// Identity service could not be reached or is not configured
    #[error("identity service unavailable: {0}")]
    IdentityUnavailable(String),
}

/// Result type for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;
