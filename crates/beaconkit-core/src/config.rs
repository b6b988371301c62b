//! Application configuration management.
//!
//! Handles loading, saving, and validating beaconkit configuration:
//! - This device's broadcast identity (namespace UUID, major, minor)
//! - Radio timing (region exit timeout, ranging interval, queue capacity)
//! - Constraints watched at start-up
//! - HTTP bind address
//!
//! Files are TOML. Environment variables prefixed `BEACONKIT__` override file
//! values, with `__` separating nested keys (`BEACONKIT__BEACON__MAJOR=7`).

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::IdentityConstraint;

/// Namespace broadcast when none is configured.
pub const DEFAULT_NAMESPACE_ID: &str = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0";

/// Reverse-DNS identifier, e.g. `com.example.app`.
static BROADCAST_DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*(\.[A-Za-z0-9][A-Za-z0-9-]*)+$")
        .unwrap_or_else(|e| panic!("invalid broadcast domain pattern: {e}"))
});

/// Whether `value` is a usable broadcast-domain identifier.
#[must_use]
pub fn is_valid_broadcast_domain(value: &str) -> bool {
    BROADCAST_DOMAIN_RE.is_match(value)
}

/// Errors loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// The file could not be read.
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Sources could not be merged or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field is invalid.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broadcast identity.
    pub beacon: BeaconConfig,
    /// Radio timing.
    pub radio: RadioConfig,
    /// HTTP server.
    pub server: ServerConfig,
    /// Constraints watched at start-up.
    pub watch: Vec<IdentityConstraint>,
}

/// This device's broadcast identity.
///
/// `namespace_id` stays a string so that a malformed value is reported when
/// the advertiser is configured rather than when the file is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Namespace UUID, hyphenated.
    pub namespace_id: String,
    /// Major value.
    pub major: u16,
    /// Minor value.
    pub minor: u16,
    /// Reverse-DNS identifier the broadcast region is registered under.
    pub broadcast_domain: Option<String>,
    /// Calibrated RSSI at one metre.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measured_power: Option<i8>,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            namespace_id: DEFAULT_NAMESPACE_ID.to_string(),
            major: 100,
            minor: 50,
            broadcast_domain: Some("io.beaconkit.device".to_string()),
            measured_power: None,
        }
    }
}

/// Radio timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Seconds without a sighting before a region reports `outside`.
    pub region_exit_timeout_secs: u64,
    /// Milliseconds between ranging batches.
    pub ranging_interval_ms: u64,
    /// Capacity of the engine event queue.
    pub event_queue_capacity: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            region_exit_timeout_secs: 30,
            ranging_interval_ms: 1000,
            event_queue_capacity: 256,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Config {
    /// Load from `path` with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, or a parse
    /// error if it cannot be deserialized.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::build(path, true)
    }

    /// Load from `path`, falling back to defaults when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the file exists but is malformed.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::build(path.as_ref(), false)
    }

    fn build(path: &Path, required: bool) -> ConfigResult<Self> {
        Self::build_with_env(path, required, environment())
    }

    fn build_with_env(path: &Path, required: bool, env: config::Environment) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(env)
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Write as pretty TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single failure, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if Uuid::parse_str(&self.beacon.namespace_id).is_err() {
            errors.push(ConfigError::ValidationError {
                field: "beacon.namespace_id".into(),
                message: format!("'{}' is not a UUID", self.beacon.namespace_id),
            });
        }

        match self.beacon.broadcast_domain.as_deref() {
            None => errors.push(ConfigError::ValidationError {
                field: "beacon.broadcast_domain".into(),
                message: "missing".into(),
            }),
            Some(domain) if !is_valid_broadcast_domain(domain) => {
                errors.push(ConfigError::ValidationError {
                    field: "beacon.broadcast_domain".into(),
                    message: format!("'{domain}' is not a reverse-DNS identifier"),
                });
            }
            Some(_) => {}
        }

        if self.radio.event_queue_capacity == 0 {
            errors.push(ConfigError::ValidationError {
                field: "radio.event_queue_capacity".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.radio.ranging_interval_ms == 0 {
            errors.push(ConfigError::ValidationError {
                field: "radio.ranging_interval_ms".into(),
                message: "must be greater than zero".into(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// `BEACONKIT__SECTION__KEY` overrides, e.g. `BEACONKIT__BEACON__MAJOR=7`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("BEACONKIT")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

/// Platform default configuration file path.
///
/// On Linux: `/etc/beaconkit/config.toml`.
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/beaconkit/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beaconkit").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_broadcast_domain_validation() {
        assert!(is_valid_broadcast_domain("com.example.app"));
        assert!(is_valid_broadcast_domain("io.beaconkit-dev.device"));
        assert!(!is_valid_broadcast_domain("localhost"));
        assert!(!is_valid_broadcast_domain("com..example"));
        assert!(!is_valid_broadcast_domain(""));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.beacon.namespace_id = "not-a-uuid".into();
        config.beacon.broadcast_domain = None;
        config.radio.event_queue_capacity = 0;

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_single_validation_error_is_not_wrapped() {
        let mut config = Config::default();
        config.beacon.broadcast_domain = Some("nodots".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { field, .. }) if field == "beacon.broadcast_domain"
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.beacon.major = 7;
        config.beacon.measured_power = Some(-61);
        config.watch = vec![
            IdentityConstraint::new(Uuid::from_u128(1)),
            IdentityConstraint::with_major_minor(Uuid::from_u128(2), 3, 4),
        ];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[beacon]\nmajor = 9\n").unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.beacon.major, 9);
        assert_eq!(loaded.beacon.minor, 50);
        assert_eq!(loaded.radio, RadioConfig::default());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(matches!(Config::load(&path), Err(ConfigError::NotFound(_))));
        assert_eq!(Config::load_or_default(&path).unwrap().beacon, BeaconConfig::default());
    }

    #[test]
    fn test_watch_entry_with_minor_only_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[[watch]]\nuuid = \"e2c56db5-dffb-48d2-b060-d0f5a71096e0\"\nminor = 3\n",
        )
        .unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_default_config_path_is_toml() {
        assert!(default_config_path().ends_with("config.toml"));
    }

    #[test]
    fn test_environment_overrides_nested_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[beacon]\nmajor = 9\nminor = 3\n").unwrap();
        let vars = [
            ("BEACONKIT__BEACON__MAJOR", "7"),
            ("BEACONKIT__RADIO__RANGING_INTERVAL_MS", "250"),
            ("UNRELATED__BEACON__MINOR", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let loaded = Config::build_with_env(&path, true, environment().source(Some(vars))).unwrap();

        assert_eq!(loaded.beacon.major, 7);
        assert_eq!(loaded.beacon.minor, 3);
        assert_eq!(loaded.radio.ranging_interval_ms, 250);
        assert_eq!(loaded.radio.event_queue_capacity, 256);
    }
}
