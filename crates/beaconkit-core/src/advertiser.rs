//! Outbound identity broadcast.
//!
//! [`BeaconAdvertiser`] turns the configured identity into an advertisement
//! and follows radio power transitions:
//!
//! | Power state    | Action                                     |
//! |----------------|--------------------------------------------|
//! | `PoweredOn`    | configure region, start broadcast          |
//! | `Resetting`    | same path; deferred until powered on       |
//! | `PoweredOff`   | none, hardware already stopped             |
//! | anything else  | none, reported                             |
//!
//! There is no retry timer. A failed start waits for the next power event.

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{is_valid_broadcast_domain, BeaconConfig};
use crate::radio::{AdvertisementPayload, RadioStack};
use crate::types::{BeaconIdentity, PowerState};

/// Advertiser failures.
#[derive(Debug, Error)]
pub enum AdvertiserError {
    /// The configured namespace is not a UUID.
    #[error("Invalid namespace UUID '{value}': {source}")]
    InvalidNamespaceId {
        /// Configured value.
        value: String,
        /// Parse failure.
        #[source]
        source: uuid::Error,
    },

    /// No broadcast-domain identifier is configured.
    #[error("No broadcast domain identifier configured")]
    MissingBroadcastDomain,

    /// The broadcast-domain identifier is malformed.
    #[error("Invalid broadcast domain identifier '{0}'")]
    InvalidBroadcastDomain(String),

    /// `configure()` has not succeeded.
    #[error("Advertiser is not configured")]
    NotConfigured,

    /// The radio is not powered on.
    #[error("Radio not powered on (state: {0:?})")]
    RadioUnavailable(PowerState),
}

/// Identity and region name resolved by `configure()`.
#[derive(Debug, Clone)]
struct BroadcastHandle {
    identity: BeaconIdentity,
    region_identifier: String,
    measured_power: Option<i8>,
}

/// This device's beacon broadcast.
#[derive(Debug)]
pub struct BeaconAdvertiser {
    config: BeaconConfig,
    handle: Option<BroadcastHandle>,
    power: PowerState,
    broadcasting: bool,
}

impl BeaconAdvertiser {
    /// Advertiser for the given identity settings. Nothing is validated yet.
    #[must_use]
    pub const fn new(config: BeaconConfig) -> Self {
        Self {
            config,
            handle: None,
            power: PowerState::Unknown,
            broadcasting: false,
        }
    }

    /// Resolve the namespace and broadcast domain. Does not transmit.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace UUID does not parse or the broadcast
    /// domain is missing or malformed.
    pub fn configure(&mut self) -> Result<(), AdvertiserError> {
        let uuid = Uuid::parse_str(&self.config.namespace_id).map_err(|source| {
            AdvertiserError::InvalidNamespaceId {
                value: self.config.namespace_id.clone(),
                source,
            }
        })?;

        let domain = self
            .config
            .broadcast_domain
            .as_deref()
            .filter(|d| !d.is_empty())
            .ok_or(AdvertiserError::MissingBroadcastDomain)?;
        if !is_valid_broadcast_domain(domain) {
            return Err(AdvertiserError::InvalidBroadcastDomain(domain.to_string()));
        }

        self.handle = Some(BroadcastHandle {
            identity: BeaconIdentity {
                uuid,
                major: self.config.major,
                minor: self.config.minor,
            },
            region_identifier: domain.to_string(),
            measured_power: self.config.measured_power,
        });
        debug!(namespace = %uuid, domain, "Advertiser configured");
        Ok(())
    }

    /// React to a radio power transition.
    ///
    /// # Errors
    ///
    /// Returns [`AdvertiserError::RadioUnavailable`] when a start was attempted
    /// on a radio that is not powered on, and [`AdvertiserError::NotConfigured`]
    /// before `configure()`. Neither is fatal.
    pub fn on_radio_power_state_changed<R: RadioStack>(
        &mut self,
        radio: &mut R,
        state: PowerState,
    ) -> Result<(), AdvertiserError> {
        self.power = state;
        match state {
            PowerState::PoweredOn => self.start_broadcast(radio),
            PowerState::Resetting => {
                self.broadcasting = false;
                self.start_broadcast(radio)
            }
            PowerState::PoweredOff => {
                self.broadcasting = false;
                info!("Radio powered off, broadcast halted");
                Ok(())
            }
            other => {
                self.broadcasting = false;
                warn!(state = ?other, "Radio not usable for broadcasting");
                Ok(())
            }
        }
    }

    fn start_broadcast<R: RadioStack>(&mut self, radio: &mut R) -> Result<(), AdvertiserError> {
        let payload = self.configure_region(radio)?;
        radio.start_advertising(&payload);
        self.broadcasting = true;
        info!(
            region = %payload.region_identifier,
            major = payload.identity.major,
            minor = payload.identity.minor,
            "Broadcast started"
        );
        Ok(())
    }

    /// Build the advertisement payload for the configured identity.
    ///
    /// A running broadcast is stopped first so the new payload replaces it.
    ///
    /// # Errors
    ///
    /// Fails without side effects if the radio is not powered on; call again
    /// on the next power-on rather than retrying.
    pub fn configure_region<R: RadioStack>(
        &mut self,
        radio: &mut R,
    ) -> Result<AdvertisementPayload, AdvertiserError> {
        let handle = self.handle.as_ref().ok_or(AdvertiserError::NotConfigured)?;
        if !self.power.is_powered_on() {
            warn!(state = ?self.power, "Cannot configure broadcast region, radio not powered on");
            return Err(AdvertiserError::RadioUnavailable(self.power));
        }

        let payload = AdvertisementPayload {
            region_identifier: handle.region_identifier.clone(),
            identity: handle.identity,
            measured_power: handle.measured_power,
        };

        if self.broadcasting {
            radio.stop_advertising();
            self.broadcasting = false;
        }
        Ok(payload)
    }

    /// Stop transmitting. Safe to call in any state.
    ///
    /// Returns `true` if a broadcast was running.
    pub fn stop_broadcasting<R: RadioStack>(&mut self, radio: &mut R) -> bool {
        if !self.broadcasting {
            return false;
        }
        radio.stop_advertising();
        self.broadcasting = false;
        info!("Broadcast stopped");
        true
    }

    /// Whether a broadcast is running.
    #[must_use]
    pub const fn is_broadcasting(&self) -> bool {
        self.broadcasting
    }

    /// Whether `configure()` has succeeded.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.handle.is_some()
    }

    /// Resolved identity, once configured.
    #[must_use]
    pub fn identity(&self) -> Option<BeaconIdentity> {
        self.handle.as_ref().map(|h| h.identity)
    }

    /// Last reported power state.
    #[must_use]
    pub const fn power_state(&self) -> PowerState {
        self.power
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::mock::MockRadio;
    use crate::radio::RadioCommand;

    fn configured() -> BeaconAdvertiser {
        let mut adv = BeaconAdvertiser::new(BeaconConfig::default());
        adv.configure().unwrap();
        adv
    }

    fn starts(radio: &MockRadio) -> usize {
        radio.count(|c| matches!(c, RadioCommand::StartAdvertising(_)))
    }

    #[test]
    fn test_configure_does_not_transmit() {
        let radio = MockRadio::authorized();
        let adv = configured();
        assert!(adv.is_configured());
        assert!(!adv.is_broadcasting());
        assert!(radio.commands().is_empty());
    }

    #[test]
    fn test_configure_rejects_bad_namespace() {
        let mut adv = BeaconAdvertiser::new(BeaconConfig {
            namespace_id: "E2C56DB5-nope".into(),
            ..BeaconConfig::default()
        });
        assert!(matches!(
            adv.configure(),
            Err(AdvertiserError::InvalidNamespaceId { .. })
        ));
        assert!(!adv.is_configured());
    }

    #[test]
    fn test_configure_rejects_missing_domain() {
        for domain in [None, Some(String::new())] {
            let mut adv = BeaconAdvertiser::new(BeaconConfig {
                broadcast_domain: domain,
                ..BeaconConfig::default()
            });
            assert!(matches!(
                adv.configure(),
                Err(AdvertiserError::MissingBroadcastDomain)
            ));
        }
    }

    #[test]
    fn test_power_on_starts_broadcast_with_identity() {
        let mut radio = MockRadio::authorized();
        let mut adv = configured();

        adv.on_radio_power_state_changed(&mut radio, PowerState::PoweredOn)
            .unwrap();

        assert!(adv.is_broadcasting());
        match &radio.commands()[..] {
            [RadioCommand::StartAdvertising(payload)] => {
                assert_eq!(payload.identity.major, 100);
                assert_eq!(payload.identity.minor, 50);
                assert_eq!(payload.region_identifier, "io.beaconkit.device");
            }
            other => panic!("unexpected commands: {other:?}"),
        }
    }

    #[test]
    fn test_power_cycle_starts_once_per_power_on() {
        let mut radio = MockRadio::authorized();
        let mut adv = configured();

        adv.on_radio_power_state_changed(&mut radio, PowerState::PoweredOn)
            .unwrap();
        let before_off = radio.commands().len();
        adv.on_radio_power_state_changed(&mut radio, PowerState::PoweredOff)
            .unwrap();
        assert_eq!(radio.commands().len(), before_off);
        adv.on_radio_power_state_changed(&mut radio, PowerState::PoweredOn)
            .unwrap();

        assert_eq!(starts(&radio), 2);
        assert!(!radio.commands().contains(&RadioCommand::StopAdvertising));
    }

    #[test]
    fn test_resetting_defers_until_powered_on() {
        let mut radio = MockRadio::authorized();
        let mut adv = configured();

        let result = adv.on_radio_power_state_changed(&mut radio, PowerState::Resetting);

        assert!(matches!(
            result,
            Err(AdvertiserError::RadioUnavailable(PowerState::Resetting))
        ));
        assert_eq!(starts(&radio), 0);

        adv.on_radio_power_state_changed(&mut radio, PowerState::PoweredOn)
            .unwrap();
        assert_eq!(starts(&radio), 1);
    }

    #[test]
    fn test_configure_region_restarts_running_broadcast() {
        let mut radio = MockRadio::authorized();
        let mut adv = configured();
        adv.on_radio_power_state_changed(&mut radio, PowerState::PoweredOn)
            .unwrap();

        adv.configure_region(&mut radio).unwrap();

        assert_eq!(radio.commands().last(), Some(&RadioCommand::StopAdvertising));
        assert!(!adv.is_broadcasting());
    }

    #[test]
    fn test_unusable_states_are_no_ops() {
        let mut radio = MockRadio::authorized();
        let mut adv = configured();

        for state in [
            PowerState::Unauthorized,
            PowerState::Unsupported,
            PowerState::Unknown,
        ] {
            assert!(adv.on_radio_power_state_changed(&mut radio, state).is_ok());
        }
        assert!(radio.commands().is_empty());
    }

    #[test]
    fn test_power_on_before_configure_is_reported() {
        let mut radio = MockRadio::authorized();
        let mut adv = BeaconAdvertiser::new(BeaconConfig::default());

        assert!(matches!(
            adv.on_radio_power_state_changed(&mut radio, PowerState::PoweredOn),
            Err(AdvertiserError::NotConfigured)
        ));
        assert!(radio.commands().is_empty());
    }

    #[test]
    fn test_stop_broadcasting_is_idempotent() {
        let mut radio = MockRadio::authorized();
        let mut adv = configured();

        assert!(!adv.stop_broadcasting(&mut radio));
        adv.on_radio_power_state_changed(&mut radio, PowerState::PoweredOn)
            .unwrap();
        assert!(adv.stop_broadcasting(&mut radio));
        assert!(!adv.stop_broadcasting(&mut radio));

        assert_eq!(
            radio.count(|c| matches!(c, RadioCommand::StopAdvertising)),
            1
        );
    }
}
