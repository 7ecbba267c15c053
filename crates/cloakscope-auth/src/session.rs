//! Bearer session verification against the identity service.

use crate::error::{AuthError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Resolves a bearer session token to the user's subject id.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

/// [`SessionVerifier`] that calls the identity service's user endpoint with
/// the token and reads the subject id from the `id` field of the reply.
#[derive(Debug, Clone)]
pub struct RemoteSessionVerifier {
    client: reqwest::Client,
    user_url: String,
}

impl RemoteSessionVerifier {
    /// Verifier for `user_url` (e.g. `https://id.example.com/auth/v1/user`).
    pub fn new(user_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::IdentityUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            user_url: user_url.into(),
        })
    }
}

#[async_trait]
impl SessionVerifier for RemoteSessionVerifier {
    async fn verify(&self, token: &str) -> Result<String> {
        let response = self
            .client
            .get(&self.user_url)
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| AuthError::IdentityUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AuthError::InvalidSession(format!(
                "identity service answered {status}"
            )));
        }
        if !status.is_success() {
            return Err(AuthError::IdentityUnavailable(format!(
                "identity service answered {status}"
            )));
        }

        let user: UserResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidSession(format!("unreadable user record: {e}")))?;
        if user.id.is_empty() {
            return Err(AuthError::InvalidSession("empty subject id".to_string()));
        }
        Ok(user.id)
    }
}
