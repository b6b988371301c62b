//! Unified error types for the beaconkit core library.
//!
//! [`BeaconError`] covers every failure mode the engine surfaces. Modules keep
//! their own narrower errors ([`ConfigError`](crate::config::ConfigError),
//! [`AdvertiserError`](crate::advertiser::AdvertiserError),
//! [`PayloadError`](crate::radio::ibeacon::PayloadError)) and convert into it.
//!
//! Radio and authorization problems are normally handled inside the engine
//! and published as [`EngineFault`](crate::engine::EngineFault)s; they only
//! appear as `BeaconError` where an operation cannot proceed at all.
//!
//! # Example
//!
//! ```rust
//! use beaconkit_core::error::{BeaconError, Result};
//!
//! fn require_domain(domain: Option<&str>) -> Result<&str> {
//!     domain.ok_or(BeaconError::MissingBroadcastDomain)
//! }
//!
//! assert!(require_domain(None).unwrap_err().is_config_error());
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::types::PowerState;

/// The unified error type for all beaconkit operations.
#[derive(Debug, Error)]
pub enum BeaconError {
    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    /// The broadcast namespace is not a UUID.
    #[error("Invalid beacon namespace UUID '{0}'. Expected hyphenated form, e.g. 'E2C56DB5-DFFB-48D2-B060-D0F5A71096E0'.")]
    InvalidNamespaceId(String),

    /// No broadcast-domain identifier could be resolved.
    #[error("No broadcast domain identifier configured. Set beacon.broadcast_domain to a reverse-DNS name.")]
    MissingBroadcastDomain,

    /// The broadcast-domain identifier is malformed.
    #[error("Invalid broadcast domain identifier '{0}'. Expected reverse-DNS form, e.g. 'com.example.app'.")]
    InvalidBroadcastDomain(String),

    /// A received or generated beacon frame is malformed.
    #[error("Invalid beacon payload: {0}")]
    InvalidPayload(String),

    // =========================================================================
    // AUTHORIZATION ERRORS
    // =========================================================================
    /// Location authorization was refused for a constraint.
    #[error("Authorization denied for region '{0}'. Grant location access to monitor it.")]
    AuthorizationDenied(String),

    // =========================================================================
    // RADIO ERRORS
    // =========================================================================
    /// The radio is not powered on.
    #[error("Radio unavailable (state: {0:?}). Commands resume on the next power-on.")]
    RadioUnavailable(PowerState),

    /// The Bluetooth backend failed.
    #[error("Bluetooth backend error: {0}")]
    Bluetooth(String),

    // =========================================================================
    // ENGINE ERRORS
    // =========================================================================
    /// An operation needs `configure()` to have succeeded first.
    #[error("Engine is not configured. Call configure() first.")]
    NotConfigured,

    /// The engine task has stopped and no longer accepts requests.
    #[error("Engine has shut down")]
    EngineClosed,

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for beaconkit operations.
pub type Result<T> = std::result::Result<T, BeaconError>;

impl BeaconError {
    /// Returns `true` if this error is a configuration problem.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_)
                | Self::ConfigParseError(_)
                | Self::ConfigValidationError(_)
                | Self::InvalidNamespaceId(_)
                | Self::MissingBroadcastDomain
                | Self::InvalidBroadcastDomain(_)
        )
    }

    /// Returns `true` if this error comes from the radio layer.
    #[inline]
    #[must_use]
    pub const fn is_radio_error(&self) -> bool {
        matches!(
            self,
            Self::RadioUnavailable(_) | Self::Bluetooth(_) | Self::InvalidPayload(_)
        )
    }

    /// Returns `true` if this error is an authorization refusal.
    #[inline]
    #[must_use]
    pub const fn is_authorization_error(&self) -> bool {
        matches!(self, Self::AuthorizationDenied(_))
    }

    /// Returns `true` if the condition clears without changing configuration.
    ///
    /// Radio unavailability resolves on the next power-on.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::RadioUnavailable(_) | Self::Bluetooth(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidPayload(_) => 400,

            // 403 Forbidden - understood but refused
            Self::AuthorizationDenied(_) => 403,

            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 409 Conflict - wrong lifecycle state
            Self::NotConfigured => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_)
            | Self::ConfigValidationError(_)
            | Self::InvalidNamespaceId(_)
            | Self::MissingBroadcastDomain
            | Self::InvalidBroadcastDomain(_) => 422,

            // 500 Internal Server Error
            Self::IoError(_) => 500,

            // 503 Service Unavailable - radio or engine down
            Self::RadioUnavailable(_) | Self::Bluetooth(_) | Self::EngineClosed => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::InvalidNamespaceId(_) => "INVALID_NAMESPACE_ID",
            Self::MissingBroadcastDomain => "MISSING_BROADCAST_DOMAIN",
            Self::InvalidBroadcastDomain(_) => "INVALID_BROADCAST_DOMAIN",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::AuthorizationDenied(_) => "AUTHORIZATION_DENIED",
            Self::RadioUnavailable(_) => "RADIO_UNAVAILABLE",
            Self::Bluetooth(_) => "BLUETOOTH_ERROR",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::EngineClosed => "ENGINE_CLOSED",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BeaconError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::ReadError { source, .. } | ConfigError::WriteError { source, .. } => {
                Self::IoError(source)
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::advertiser::AdvertiserError> for BeaconError {
    fn from(err: crate::advertiser::AdvertiserError) -> Self {
        use crate::advertiser::AdvertiserError;
        match err {
            AdvertiserError::InvalidNamespaceId { value, .. } => Self::InvalidNamespaceId(value),
            AdvertiserError::MissingBroadcastDomain => Self::MissingBroadcastDomain,
            AdvertiserError::InvalidBroadcastDomain(domain) => Self::InvalidBroadcastDomain(domain),
            AdvertiserError::NotConfigured => Self::NotConfigured,
            AdvertiserError::RadioUnavailable(state) => Self::RadioUnavailable(state),
        }
    }
}

impl From<crate::radio::ibeacon::PayloadError> for BeaconError {
    fn from(err: crate::radio::ibeacon::PayloadError) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertiser::AdvertiserError;
    use crate::config::ConfigError;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_config_error_classification() {
        assert!(BeaconError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(BeaconError::InvalidNamespaceId("x".into()).is_config_error());
        assert!(BeaconError::MissingBroadcastDomain.is_config_error());

        assert!(!BeaconError::RadioUnavailable(PowerState::PoweredOff).is_config_error());
    }

    #[test]
    fn test_radio_error_classification() {
        assert!(BeaconError::RadioUnavailable(PowerState::Unsupported).is_radio_error());
        assert!(BeaconError::Bluetooth("dbus".into()).is_radio_error());
        assert!(!BeaconError::NotConfigured.is_radio_error());
    }

    #[test]
    fn test_authorization_error_classification() {
        assert!(BeaconError::AuthorizationDenied("region".into()).is_authorization_error());
        assert!(!BeaconError::NotConfigured.is_authorization_error());
        assert!(!BeaconError::RadioUnavailable(PowerState::PoweredOff).is_authorization_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(BeaconError::RadioUnavailable(PowerState::PoweredOff).is_recoverable());
        assert!(!BeaconError::MissingBroadcastDomain.is_recoverable());
        assert!(!BeaconError::AuthorizationDenied("r".into()).is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(BeaconError::AuthorizationDenied("r".into()).http_status_code(), 403);
        assert_eq!(BeaconError::NotConfigured.http_status_code(), 409);
        assert_eq!(BeaconError::MissingBroadcastDomain.http_status_code(), 422);
        assert_eq!(
            BeaconError::RadioUnavailable(PowerState::PoweredOff).http_status_code(),
            503
        );
        assert_eq!(BeaconError::EngineClosed.http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(BeaconError::NotConfigured.error_code(), "NOT_CONFIGURED");
        assert_eq!(
            BeaconError::InvalidNamespaceId("x".into()).error_code(),
            "INVALID_NAMESPACE_ID"
        );
    }

    #[test]
    fn test_from_config_validation_errors() {
        let err: BeaconError = ConfigError::MultipleValidationErrors(vec![
            ConfigError::ValidationError {
                field: "a".into(),
                message: "bad".into(),
            },
            ConfigError::ValidationError {
                field: "b".into(),
                message: "worse".into(),
            },
        ])
        .into();
        assert!(matches!(&err, BeaconError::ConfigValidationError(m) if m.contains("; ")));
    }

    #[test]
    fn test_from_advertiser_error() {
        let err: BeaconError = AdvertiserError::MissingBroadcastDomain.into();
        assert!(matches!(err, BeaconError::MissingBroadcastDomain));
    }

    #[test]
    fn test_from_io_error() {
        let err: BeaconError = IoErr::new(ErrorKind::NotFound, "gone").into();
        assert_eq!(err.error_code(), "IO_ERROR");
    }

    #[test]
    fn test_error_display_messages() {
        let err = BeaconError::InvalidNamespaceId("nope".into());
        assert!(err.to_string().contains("nope"));
        assert!(BeaconError::NotConfigured.to_string().contains("configure()"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BeaconError>();
        assert_sync::<BeaconError>();
    }
}
