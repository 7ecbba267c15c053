//! Outbound probing for cloak detection.
//!
//! Every request passes the URL guard before it leaves the process, including
//! each redirect hop. Probes run under synthetic client profiles, are paced
//! per host, and reduce pages to a fingerprint and a short preview.

pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod guard;
pub mod profiles;
pub mod rate_limit;
pub mod token;
pub mod transport;

pub use error::{ProbeError, Result};
pub use executor::{FetchRequest, FetchResult, HttpProber, Liveness, ProbeOutcome, Prober};
pub use fingerprint::{
    normalize_body, preview, Fingerprinter, RollingHashFingerprinter, Sha256Fingerprinter,
    DEFAULT_PREVIEW_CHARS,
};
pub use guard::{check_url, is_safe_url, UrlRejection};
pub use profiles::{
    ClientProfile, DeviceIdentity, GeoHint, ProfileCatalog, ProfileHeaders, Referrer,
};
pub use rate_limit::RateLimiter;
pub use token::{append_token, deduce_token, strip_token};
pub use transport::{HttpReply, HttpRequest, HttpTransport, Method, Transport};
