//! Configuration management for Cloakscope.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main service configuration.
///
/// This is loaded from `~/.config/cloakscope/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener and storage settings
    pub server: ServerConfig,
    /// Outbound probe behavior
    pub probing: ProbingConfig,
    /// Scheduled worker limits and scoring
    pub worker: WorkerConfig,
    /// Trigger authentication settings
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults if missing.
    pub fn load_from(config_path: &Path) -> ConfigResult<Self> {
        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(config_path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `CLOAKSCOPE_HOST`: Override listen host
    /// - `CLOAKSCOPE_PORT`: Override listen port
    /// - `CLOAKSCOPE_DATABASE`: Override database path
    /// - `CLOAKSCOPE_PROBE_DELAY_MS`: Override inter-probe delay
    /// - `CLOAKSCOPE_IDENTITY_URL`: Override identity service URL
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `CLOAKSCOPE_*` environment overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CLOAKSCOPE_HOST") {
            tracing::debug!("Override server.host from env: {}", val);
            self.server.host = val;
        }

        if let Ok(val) = std::env::var("CLOAKSCOPE_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
                tracing::debug!("Override server.port from env: {}", port);
            }
        }

        if let Ok(val) = std::env::var("CLOAKSCOPE_DATABASE") {
            tracing::debug!("Override server.database_path from env: {}", val);
            self.server.database_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("CLOAKSCOPE_PROBE_DELAY_MS") {
            if let Ok(delay) = val.parse() {
                self.probing.delay_ms = delay;
                tracing::debug!("Override probing.delay_ms from env: {}", delay);
            }
        }

        if let Ok(val) = std::env::var("CLOAKSCOPE_IDENTITY_URL") {
            tracing::debug!("Override auth.identity_url from env: {}", val);
            self.auth.identity_url = Some(val);
        }
    }

    /// Reject values that would disable the probe discipline.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.probing.max_conditions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "probing.max_conditions".to_string(),
                reason: "at least one alternate condition must run".to_string(),
            });
        }
        if self.probing.max_redirects == 0 {
            return Err(ConfigError::InvalidValue {
                field: "probing.max_redirects".to_string(),
                reason: "must allow at least one hop".to_string(),
            });
        }
        if self.worker.suspicion_increment > self.worker.max_suspicion_score {
            return Err(ConfigError::InvalidValue {
                field: "worker.suspicion_increment".to_string(),
                reason: "cannot exceed worker.max_suspicion_score".to_string(),
            });
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/cloakscope/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "cloakscope", "cloakscope")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/cloakscope`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "cloakscope", "cloakscope")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

/// HTTP listener and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// `SQLite` database file (or `:memory:`)
    pub database_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            database_path: PathBuf::from("cloakscope.db"),
        }
    }
}

/// Outbound probe behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbingConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Minimum delay between probes to the same host, in milliseconds
    pub delay_ms: u64,
    /// Characters kept in a snapshot content preview
    pub preview_chars: usize,
    /// Alternate conditions executed per divergence run
    pub max_conditions: usize,
    /// Redirect hop cap
    pub max_redirects: usize,
    /// Replacement User-Agent for the crawler identity
    pub crawler_user_agent: Option<String>,
    /// Replacement User-Agent for the mobile identity
    pub mobile_user_agent: Option<String>,
    /// Replacement User-Agent for the desktop identity
    pub desktop_user_agent: Option<String>,
}

impl Default for ProbingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            delay_ms: 750,
            preview_chars: 500,
            max_conditions: 3,
            max_redirects: 10,
            crawler_user_agent: None,
            mobile_user_agent: None,
            desktop_user_agent: None,
        }
    }
}

/// Scheduled worker limits and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Targets tested by an intraday divergence run
    pub intraday_limit: u32,
    /// Minimum suspicion score for intraday candidates
    pub intraday_min_score: i64,
    /// Targets tested by a daily divergence run
    pub daily_limit: u32,
    /// Targets checked by a status-check run
    pub status_check_limit: u32,
    /// Score added to a target on confirmed divergence
    pub suspicion_increment: i64,
    /// Score ceiling
    pub max_suspicion_score: i64,
    /// Targets listed per tenant in the daily summary
    pub summary_top_n: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            intraday_limit: 20,
            intraday_min_score: 50,
            daily_limit: 100,
            status_check_limit: 200,
            suspicion_increment: 25,
            max_suspicion_score: 100,
            summary_top_n: 10,
        }
    }
}

/// Trigger authentication settings.
///
/// The signing secret itself is never read from the config file; it comes
/// from `CLOAKSCOPE_CRON_SECRET`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted clock skew for signed requests, in seconds
    pub signature_window_secs: i64,
    /// Identity service endpoint that resolves a bearer token to a user
    pub identity_url: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signature_window_secs: 300,
            identity_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.probing.max_conditions, 3);
        assert_eq!(config.probing.max_redirects, 10);
        assert_eq!(config.worker.suspicion_increment, 25);
        assert_eq!(config.auth.signature_window_secs, 300);
        assert!(config.auth.identity_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[probing]"));
        assert!(toml_str.contains("[worker]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.probing.delay_ms, config.probing.delay_ms);
    }

    #[test]
    fn test_config_load_from_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.server.port = 9000;
        config.probing.delay_ms = 1000;

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.probing.delay_ms, 1000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().expect("create temp dir");
        let loaded = AppConfig::load_from(&tmp.path().join("absent.toml")).expect("load config");
        assert_eq!(loaded.server.port, 8787);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");
        fs::write(&config_path, "[probing]\nmax_conditions = 0\n").expect("write config file");

        let result = AppConfig::load_from(&config_path);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("CLOAKSCOPE_PORT", "9911");
        std::env::set_var("CLOAKSCOPE_PROBE_DELAY_MS", "1200");
        std::env::set_var("CLOAKSCOPE_IDENTITY_URL", "https://id.example.com/auth/v1/user");

        let mut config = AppConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, 9911);
        assert_eq!(config.probing.delay_ms, 1200);
        assert_eq!(
            config.auth.identity_url.as_deref(),
            Some("https://id.example.com/auth/v1/user")
        );

        std::env::remove_var("CLOAKSCOPE_PORT");
        std::env::remove_var("CLOAKSCOPE_PROBE_DELAY_MS");
        std::env::remove_var("CLOAKSCOPE_IDENTITY_URL");
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[server]
port = 3000

[worker]
daily_limit = 10
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.worker.daily_limit, 10);
        // These should be defaults
        assert_eq!(config.worker.intraday_limit, 20);
        assert_eq!(config.probing.preview_chars, 500);
    }
}
