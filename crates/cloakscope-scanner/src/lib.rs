//! Cloakscope Scanner - divergence testing and security audits.
//!
//! Builds on `cloakscope-probe` for outbound requests and `cloakscope-db` for
//! persistence.
//!
//! # Features
//!
//! - Divergence tester: baseline probe plus alternate client profiles, with
//!   snapshots for every attempt and an atomic suspicion-score update
//! - Audit pipeline: header consistency, redirect chain, transport security,
//!   domain reputation and technology fingerprint modules, each isolated in
//!   its own execution record
//!
//! # Example
//!
//! ```rust,ignore
//! use cloakscope_scanner::{DivergenceSettings, DivergenceTester};
//!
//! let tester = DivergenceTester::new(prober, DivergenceSettings::default());
//! let report = tester.run(db.pool(), &target.id, &target.final_lp_url, &run.id).await?;
//! if report.divergence_found {
//!     println!("cloaked: {:?}", report.offending_url);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

#[allow(missing_docs)]
pub mod audit;
pub mod divergence;
#[allow(missing_docs)]
pub mod error;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use audit::domain_reputation::{DomainAgeSource, SimulatedDomainAge};
pub use audit::{modules_for, AuditModuleKind, AuditPipeline, AuditSummary, ModuleOutput};
pub use divergence::{DivergenceReport, DivergenceSettings, DivergenceTester};
pub use error::{Result, ScanError, BLOCKED_URL_MESSAGE};
