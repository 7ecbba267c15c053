//! Cloakscope Core - Foundation crate for the Cloakscope cloak-detection service.
//!
//! This crate provides shared types, error handling and configuration
//! management that all other Cloakscope crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths and env overrides
//! - [`types`] - Shared enums (`Severity`)
//!
//! # Example
//!
//! ```rust
//! use cloakscope_core::{AppConfig, Severity};
//!
//! let config = AppConfig::default();
//! assert_eq!(config.probing.max_redirects, 10);
//! assert!(Severity::Critical > Severity::High);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{AppConfig, AuthConfig, ProbingConfig, ServerConfig, WorkerConfig};
pub use error::{ConfigError, ConfigResult, CoreError, Result};
pub use types::Severity;
