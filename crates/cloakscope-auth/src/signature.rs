//! Signed scheduler requests.
//!
//! The scheduler signs `"{timestamp}.{raw_body}"` with HMAC-SHA256 and sends
//! the hex digest in `x-cron-signature` and the unix timestamp in
//! `x-cron-timestamp`.

use crate::error::{AuthError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC.
pub const SIGNATURE_HEADER: &str = "x-cron-signature";

/// Header carrying the unix timestamp, in seconds.
pub const TIMESTAMP_HEADER: &str = "x-cron-timestamp";

/// Environment variable holding the shared secret.
pub const SECRET_ENV: &str = "CLOAKSCOPE_CRON_SECRET";

/// Verifies (and, for callers and tests, produces) request signatures.
pub struct SignatureVerifier {
    secret: Zeroizing<Vec<u8>>,
    window_secs: i64,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"<redacted>")
            .field("window_secs", &self.window_secs)
            .finish()
    }
}

impl SignatureVerifier {
    /// Verifier for `secret`, accepting timestamps within `window_secs`.
    pub fn new(secret: impl Into<Vec<u8>>, window_secs: i64) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            window_secs: window_secs.abs(),
        }
    }

    /// Verifier keyed by `CLOAKSCOPE_CRON_SECRET`, or `None` when unset or empty.
    pub fn from_env(window_secs: i64) -> Option<Self> {
        let secret = Zeroizing::new(std::env::var(SECRET_ENV).ok()?);
        if secret.is_empty() {
            return None;
        }
        Some(Self::new(secret.as_bytes(), window_secs))
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac
    }

    /// Hex signature of `body` at `timestamp`.
    #[must_use]
    pub fn sign(&self, timestamp: i64, body: &[u8]) -> String {
        hex::encode(self.mac(&timestamp.to_string(), body).finalize().into_bytes())
    }

    /// Check `signature` and `timestamp` headers against `body` at `now`.
    ///
    /// The comparison is constant-time.
    pub fn verify(&self, signature: &str, timestamp: &str, body: &[u8], now: i64) -> Result<()> {
        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AuthError::MalformedSignature(format!("bad timestamp '{timestamp}'")))?;

        let skew_secs = now.saturating_sub(ts);
        if skew_secs.abs() > self.window_secs {
            return Err(AuthError::StaleTimestamp {
                skew_secs,
                window_secs: self.window_secs,
            });
        }

        let expected = hex::decode(signature.trim())
            .map_err(|e| AuthError::MalformedSignature(format!("signature is not hex: {e}")))?;

        self.mac(timestamp.trim(), body)
            .verify_slice(&expected)
            .map_err(|_| AuthError::InvalidSignature)
    }
}
