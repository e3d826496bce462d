//! Configuration management for Tandem.
//!
//! Configuration is stored in TOML. Every section and field has a default,
//! so an empty file is a valid configuration.
//!
//! # Configuration File Locations
//!
//! - Unix: `~/.config/tandem/tandem.toml`
//! - Windows: `%APPDATA%\tandem\tandem.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keystore::FileKeyStore;
use crate::trust::DeviceRole;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Top-level configuration.
///
/// # Example TOML
///
/// ```toml
/// [pairing]
/// session_timeout_ms = 300000
/// max_payload_age_ms = 300000
/// max_clock_skew_ms = 60000
///
/// [web_session]
/// max_idle_seconds = 1800
/// session_ttl_seconds = 86400
/// max_session_ttl_seconds = 604800
///
/// [storage]
/// backend = "sqlite"  # "memory" | "sqlite"
///
/// [identity]
/// device_name = "My Laptop"
/// role = "trusted_executor"
///
/// [logging]
/// level = "info"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pairing: PairingConfig,

    #[serde(default)]
    pub web_session: WebSessionConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pairing timeouts (milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingConfig {
    /// How long an initiator waits for a response before the attempt expires.
    #[serde(default = "default_pairing_timeout")]
    pub session_timeout_ms: u64,

    /// Maximum age of a scanned QR payload or a pairing response.
    #[serde(default = "default_pairing_timeout")]
    pub max_payload_age_ms: u64,

    /// How far in the future a V2 payload timestamp may be.
    #[serde(default = "default_clock_skew")]
    pub max_clock_skew_ms: u64,
}

fn default_pairing_timeout() -> u64 {
    300_000
}

fn default_clock_skew() -> u64 {
    60_000
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_pairing_timeout(),
            max_payload_age_ms: default_pairing_timeout(),
            max_clock_skew_ms: default_clock_skew(),
        }
    }
}

/// Hard ceiling for any web-session TTL or idle limit (one year).
pub const MAX_SESSION_LIMIT_SECONDS: u64 = 365 * 86_400;

/// Web-session limits (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSessionConfig {
    #[serde(default = "default_max_idle")]
    pub max_idle_seconds: u64,

    #[serde(default = "default_ttl")]
    pub session_ttl_seconds: u64,

    /// Upper bound on any requested TTL.
    #[serde(default = "default_max_ttl")]
    pub max_session_ttl_seconds: u64,
}

fn default_max_idle() -> u64 {
    1800
}

fn default_ttl() -> u64 {
    86_400
}

fn default_max_ttl() -> u64 {
    7 * 86_400
}

impl Default for WebSessionConfig {
    fn default() -> Self {
        Self {
            max_idle_seconds: default_max_idle(),
            session_ttl_seconds: default_ttl(),
            max_session_ttl_seconds: default_max_ttl(),
        }
    }
}

/// Where sessions and trusted devices are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory" or "sqlite"
    #[serde(default = "default_backend")]
    pub backend: String,

    /// SQLite database path (empty = default location)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: None,
        }
    }
}

/// Local device identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path to the key file (empty = default location)
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Stable device id (empty = generated on first run)
    #[serde(default)]
    pub device_id: Option<String>,

    #[serde(default = "default_device_name")]
    pub device_name: String,

    #[serde(default = "default_role")]
    pub role: DeviceRole,
}

fn default_device_name() -> String {
    "Tandem Device".to_string()
}

fn default_role() -> DeviceRole {
    DeviceRole::TrustedExecutor
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            device_id: None,
            device_name: default_device_name(),
            role: default_role(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or full `EnvFilter` directive, e.g. "info,tandem_core=debug"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load and validate configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `custom_path`, else the default location, else defaults.
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = custom_path {
            return Self::load(path);
        }
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::load(&path);
            }
        }
        Ok(Self::default())
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "tandem", "tandem")
            .map(|dirs| dirs.config_dir().join("tandem.toml"))
    }

    /// Data directory for the key file and the database.
    pub fn data_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "tandem", "tandem")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    pub fn key_path(&self) -> Option<PathBuf> {
        self.identity
            .key_path
            .clone()
            .or_else(|| Self::data_dir().map(|d| d.join("device_key.json")))
    }

    /// Key store at [`Config::key_path`].
    pub fn key_store(&self) -> Option<FileKeyStore> {
        self.key_path().map(FileKeyStore::new)
    }

    pub fn db_path(&self) -> Option<PathBuf> {
        self.storage
            .db_path
            .clone()
            .or_else(|| Self::data_dir().map(|d| d.join("tandem.db")))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pairing;
        if p.session_timeout_ms == 0 || p.max_payload_age_ms == 0 {
            return Err(ConfigError::ValidationError(
                "pairing timeouts must be greater than 0".to_string(),
            ));
        }

        let w = &self.web_session;
        if w.max_idle_seconds == 0 || w.session_ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "max_idle_seconds and session_ttl_seconds must be greater than 0".to_string(),
            ));
        }
        if w.max_session_ttl_seconds > MAX_SESSION_LIMIT_SECONDS
            || w.max_idle_seconds > MAX_SESSION_LIMIT_SECONDS
        {
            return Err(ConfigError::ValidationError(format!(
                "web session limits must not exceed {MAX_SESSION_LIMIT_SECONDS} seconds"
            )));
        }
        if w.session_ttl_seconds > w.max_session_ttl_seconds {
            return Err(ConfigError::ValidationError(format!(
                "session_ttl_seconds {} exceeds max_session_ttl_seconds {}",
                w.session_ttl_seconds, w.max_session_ttl_seconds
            )));
        }

        let valid_backends = ["memory", "sqlite"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid storage backend '{}'. Valid values: {:?}",
                self.storage.backend, valid_backends
            )));
        }

        if self.identity.device_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "identity.device_name must not be empty".to_string(),
            ));
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}
