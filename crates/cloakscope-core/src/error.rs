//! Errors raised by the shared core: configuration loading and the parsing of
//! stored enum values.

use thiserror::Error;

/// Error from the core crate.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Loading or validating `cloakscope.toml` failed
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A stored severity is not one of `low|medium|high|critical`
    #[error("unknown severity '{0}'")]
    UnknownSeverity(String),
}

/// Error while reading, validating or writing the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory to look in
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// The file is not valid TOML for [`AppConfig`](crate::AppConfig)
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Config could not be written back as TOML
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A value outside its allowed range, or a malformed `CLOAKSCOPE_*` override
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Dotted key, e.g. `probing.timeout_secs`
        field: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Result with [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Result with [`ConfigError`].
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
