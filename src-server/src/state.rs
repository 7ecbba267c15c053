//! Application state shared across handlers.

use cloakscope_auth::{Authenticator, RemoteSessionVerifier, SignatureVerifier};
use cloakscope_core::AppConfig;
use cloakscope_db::Database;
use cloakscope_probe::{
    HttpProber, HttpTransport, ProfileCatalog, Prober, RateLimiter, RollingHashFingerprinter,
};
use std::sync::Arc;
use std::time::Duration;

/// State handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<AppConfig>,
    /// Store
    pub db: Database,
    /// Outbound probing, shared so the per-host pacing spans a whole run
    pub prober: Arc<dyn Prober>,
    /// Worker trigger gate
    pub auth: Authenticator,
}

impl AppState {
    /// Assemble state from already-built parts.
    pub fn new(
        config: AppConfig,
        db: Database,
        prober: Arc<dyn Prober>,
        auth: Authenticator,
    ) -> Self {
        Self {
            config: Arc::new(config),
            db,
            prober,
            auth,
        }
    }

    /// Build the production prober and authenticator from `config`.
    ///
    /// The signing secret is read from `CLOAKSCOPE_CRON_SECRET`; signed
    /// requests are refused when it is unset.
    pub fn from_config(config: AppConfig, db: Database) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.probing.timeout_secs);
        let transport = HttpTransport::new(timeout)?;
        let prober = HttpProber::new(
            Arc::new(transport),
            Arc::new(ProfileCatalog::from_config(&config.probing)),
            Arc::new(RollingHashFingerprinter),
            Arc::new(RateLimiter::new(config.probing.delay_ms)),
            &config.probing,
        );

        let mut auth = Authenticator::new();
        match SignatureVerifier::from_env(config.auth.signature_window_secs) {
            Some(verifier) => auth = auth.with_signatures(verifier),
            None => tracing::warn!(
                "{} is not set; signed worker triggers will be refused",
                cloakscope_auth::SECRET_ENV
            ),
        }
        match &config.auth.identity_url {
            Some(url) => {
                let sessions = RemoteSessionVerifier::new(url.clone(), timeout)?;
                auth = auth.with_sessions(Arc::new(sessions));
            }
            None => tracing::warn!("No identity service configured; bearer triggers will be refused"),
        }

        Ok(Self::new(config, db, Arc::new(prober), auth))
    }
}
