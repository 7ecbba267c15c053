//! Trigger authentication gate.

use crate::error::{AuthError, Result};
use crate::session::SessionVerifier;
use crate::signature::SignatureVerifier;
use std::sync::Arc;

/// Credentials pulled from a request.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerCredentials<'a> {
    /// `x-cron-signature`
    pub signature: Option<&'a str>,
    /// `x-cron-timestamp`
    pub timestamp: Option<&'a str>,
    /// `Authorization`
    pub authorization: Option<&'a str>,
}

impl TriggerCredentials<'_> {
    fn has_signature_headers(&self) -> bool {
        self.signature.is_some() || self.timestamp.is_some()
    }
}

/// Who triggered a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The scheduler, via a signed request
    Cron,
    /// A signed-in user
    User {
        /// Subject id from the identity service
        subject: String,
    },
}

/// Accepts signed scheduler requests or bearer sessions.
///
/// When either signature header is present the signature path decides
/// alone; a bad signature never falls back to the bearer token.
#[derive(Clone, Default)]
pub struct Authenticator {
    signatures: Option<Arc<SignatureVerifier>>,
    sessions: Option<Arc<dyn SessionVerifier>>,
}

impl Authenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_signatures(mut self, verifier: SignatureVerifier) -> Self {
        self.signatures = Some(Arc::new(verifier));
        self
    }

    #[must_use]
    pub fn with_sessions(mut self, verifier: Arc<dyn SessionVerifier>) -> Self {
        self.sessions = Some(verifier);
        self
    }

    /// Authenticate against the current clock.
    pub async fn authenticate(
        &self,
        credentials: &TriggerCredentials<'_>,
        body: &[u8],
    ) -> Result<Principal> {
        self.authenticate_at(credentials, body, chrono::Utc::now().timestamp())
            .await
    }

    /// Authenticate as of unix time `now`.
    pub async fn authenticate_at(
        &self,
        credentials: &TriggerCredentials<'_>,
        body: &[u8],
        now: i64,
    ) -> Result<Principal> {
        if credentials.has_signature_headers() {
            let (Some(signature), Some(timestamp)) = (credentials.signature, credentials.timestamp)
            else {
                return Err(AuthError::MalformedSignature(
                    "both x-cron-signature and x-cron-timestamp are required".to_string(),
                ));
            };
            let verifier = self.signatures.as_ref().ok_or(AuthError::SignatureDisabled)?;
            verifier.verify(signature, timestamp, body, now)?;
            tracing::debug!("Signed trigger accepted");
            return Ok(Principal::Cron);
        }

        let token = credentials
            .authorization
            .and_then(bearer_token)
            .ok_or(AuthError::MissingCredentials)?;
        let sessions = self.sessions.as_ref().ok_or_else(|| {
            AuthError::IdentityUnavailable("no identity service configured".to_string())
        })?;
        let subject = sessions.verify(token).await?;
        tracing::debug!("Session trigger accepted for {}", subject);
        Ok(Principal::User { subject })
    }
}

/// Token part of an `Authorization: Bearer <token>` header.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
