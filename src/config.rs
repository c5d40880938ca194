//! Configuration for the warden engine.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `warden.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `WARDEN_SERVER_URL` - Base URL of the license server
//! - `WARDEN_REQUEST_TIMEOUT_SECS` - Bounded timeout for server round trips
//! - `WARDEN_GRACE_PERIOD_DAYS` - Offline grace window, anchored to the last
//!   successful online check
//! - `WARDEN_MATCH_FRACTION` - Minimum fingerprint match fraction
//! - `WARDEN_HEARTBEAT_INTERVAL_SECS` - Session heartbeat interval
//! - `WARDEN_MAX_HEARTBEAT_MISSES` - Consecutive misses before session loss
//! - `WARDEN_STORAGE_DIR` - Override for the local store directory
//! - `WARDEN_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//!
//! The loaded [`WardenConfig`] is a plain value: construct it once at startup
//! and pass it into [`crate::validation::ValidationEngine`] and
//! [`crate::session::SessionArbitrator`]. There is no process-wide singleton.

use config::Config;
use serde::Deserialize;
use std::env;

use crate::errors::{LicenseError, LicenseResult};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// License server connection settings
    pub server: ServerConfig,
    /// Validation and grace-period settings
    pub license: LicenseConfig,
    /// Session heartbeat settings
    pub session: SessionConfig,
    /// Local store settings
    pub storage: StorageConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// License server connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the license server, e.g. `https://licensing.example.com`
    pub base_url: String,
    /// Bounded timeout for every server round trip, in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:8443".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Validation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Days after the last *successful online check* during which an expired
    /// license is still treated as usable offline
    pub grace_period_days: i64,
    /// Minimum fraction of stored fingerprint weight that must match the
    /// current machine (0.6 tolerates single-component churn)
    pub minimum_match_fraction: f64,
    /// Shape that human-entered activation codes must match
    pub code_pattern: String,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            grace_period_days: 14,
            minimum_match_fraction: 0.6,
            code_pattern: r"^[A-Z0-9]{4}(-[A-Z0-9]{4}){3}$".to_string(),
        }
    }
}

/// Session heartbeat settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Consecutive heartbeat misses before the session is considered lost
    pub max_heartbeat_misses: u32,
    /// Time budget for the best-effort session release during shutdown
    pub shutdown_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 120,
            max_heartbeat_misses: 4,
            shutdown_grace_secs: 5,
        }
    }
}

/// Local store settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Override for the store directory. Empty means the platform app-data
    /// directory (`<data_dir>/warden`).
    pub dir: String,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl WardenConfig {
    /// Load configuration from `warden.toml` and the environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `warden.toml` file (optional)
    /// 3. `WARDEN_*` environment variables
    pub fn load() -> LicenseResult<Self> {
        let builder = Config::builder()
            .add_source(config::File::with_name("warden").required(false))
            .set_override_option("server.base_url", env::var("WARDEN_SERVER_URL").ok())
            .map_err(|e| LicenseError::Config(e.to_string()))?
            .set_override_option(
                "server.request_timeout_secs",
                env::var("WARDEN_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::Config(e.to_string()))?
            .set_override_option(
                "license.grace_period_days",
                env::var("WARDEN_GRACE_PERIOD_DAYS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::Config(e.to_string()))?
            .set_override_option(
                "license.minimum_match_fraction",
                env::var("WARDEN_MATCH_FRACTION")
                    .ok()
                    .and_then(|v| v.parse::<f64>().ok()),
            )
            .map_err(|e| LicenseError::Config(e.to_string()))?
            .set_override_option(
                "session.heartbeat_interval_secs",
                env::var("WARDEN_HEARTBEAT_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::Config(e.to_string()))?
            .set_override_option(
                "session.max_heartbeat_misses",
                env::var("WARDEN_MAX_HEARTBEAT_MISSES")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| LicenseError::Config(e.to_string()))?
            .set_override_option("storage.dir", env::var("WARDEN_STORAGE_DIR").ok())
            .map_err(|e| LicenseError::Config(e.to_string()))?
            .set_override_option("logging.level", env::var("WARDEN_LOG_LEVEL").ok())
            .map_err(|e| LicenseError::Config(e.to_string()))?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::Config(format!("failed to build config: {e}")))?;

        let config: WardenConfig = settings
            .try_deserialize()
            .map_err(|e| LicenseError::Config(format!("failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.server.base_url.is_empty() {
            return Err(LicenseError::Config(
                "server.base_url cannot be empty".to_string(),
            ));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(LicenseError::Config(
                "server.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.license.grace_period_days < 0 {
            return Err(LicenseError::Config(
                "license.grace_period_days cannot be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.license.minimum_match_fraction) {
            return Err(LicenseError::Config(
                "license.minimum_match_fraction must be between 0.0 and 1.0".to_string(),
            ));
        }
        regex::Regex::new(&self.license.code_pattern).map_err(|e| {
            LicenseError::Config(format!("license.code_pattern is not a valid regex: {e}"))
        })?;

        if self.session.heartbeat_interval_secs == 0 {
            return Err(LicenseError::Config(
                "session.heartbeat_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.session.max_heartbeat_misses == 0 {
            return Err(LicenseError::Config(
                "session.max_heartbeat_misses must be greater than 0".to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::Config(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }
}
