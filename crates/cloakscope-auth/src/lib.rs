//! Cloakscope Authentication Layer
//!
//! Decides whether a worker trigger may run. Two credential kinds are
//! accepted:
//!
//! 1. **Signed scheduler requests**: HMAC-SHA256 over `"{timestamp}.{body}"`
//!    in `x-cron-signature`, unix seconds in `x-cron-timestamp`
//! 2. **Bearer sessions**: `Authorization: Bearer <token>`, resolved to a
//!    subject id by the identity service
//!
//! If either signature header is present the request is judged on its
//! signature alone. Tenant resolution for users happens in the server, not
//! here.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod authenticator;
pub mod error;
#[allow(missing_docs)]
pub mod session;
pub mod signature;

pub use authenticator::{Authenticator, Principal, TriggerCredentials};
pub use error::{AuthError, Result};
pub use session::{RemoteSessionVerifier, SessionVerifier};
pub use signature::{SignatureVerifier, SECRET_ENV, SIGNATURE_HEADER, TIMESTAMP_HEADER};
