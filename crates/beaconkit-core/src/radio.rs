//! Radio collaborator interface.
//!
//! The engine never talks to Bluetooth hardware itself. It issues commands
//! through [`RadioStack`] and receives everything the hardware reports as
//! [`RadioEvent`]s, delivered through a [`RadioEventHandler`].
//!
//! Implementations:
//! - [`mock::MockRadio`] - records commands in memory (tests, development)
//! - [`bluez::BluezRadio`] - BlueZ backend via `bluer` (feature `bluetooth`)

pub mod ibeacon;

#[cfg(feature = "bluetooth")]
pub mod bluez;
#[cfg(any(feature = "mock-radio", not(feature = "bluetooth")))]
pub mod mock;

use crate::types::{
    Authorization, BeaconIdentity, BeaconRegion, IdentityConstraint, Observation, PowerState,
    RegionState,
};

/// Everything needed to render an outbound beacon advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementPayload {
    /// Region name the broadcast is registered under.
    pub region_identifier: String,
    /// Identity to broadcast.
    pub identity: BeaconIdentity,
    /// Calibrated RSSI at one metre, if configured.
    pub measured_power: Option<i8>,
}

/// Commands the engine issues to the radio stack.
///
/// Every method returns immediately; outcomes arrive later as [`RadioEvent`]s.
pub trait RadioStack {
    /// Current location authorization.
    fn authorization(&self) -> Authorization;

    /// Ask the user for authorization. The answer arrives as
    /// [`RadioEvent::AuthorizationChanged`].
    fn request_authorization(&mut self);

    /// Begin coarse presence monitoring for a region.
    fn start_monitoring(&mut self, region: &BeaconRegion);

    /// Stop monitoring a region.
    fn stop_monitoring(&mut self, region: &BeaconRegion);

    /// Begin fine-grained ranging for a constraint.
    fn start_ranging(&mut self, constraint: &IdentityConstraint);

    /// Stop ranging for a constraint.
    fn stop_ranging(&mut self, constraint: &IdentityConstraint);

    /// Begin broadcasting this device's identity.
    fn start_advertising(&mut self, payload: &AdvertisementPayload);

    /// Stop broadcasting.
    fn stop_advertising(&mut self);
}

/// A command as data, for collaborators that queue or record them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    /// See [`RadioStack::request_authorization`].
    RequestAuthorization,
    /// See [`RadioStack::start_monitoring`].
    StartMonitoring(BeaconRegion),
    /// See [`RadioStack::stop_monitoring`].
    StopMonitoring(BeaconRegion),
    /// See [`RadioStack::start_ranging`].
    StartRanging(IdentityConstraint),
    /// See [`RadioStack::stop_ranging`].
    StopRanging(IdentityConstraint),
    /// See [`RadioStack::start_advertising`].
    StartAdvertising(AdvertisementPayload),
    /// See [`RadioStack::stop_advertising`].
    StopAdvertising,
}

/// Notifications delivered by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Radio power state changed.
    PowerStateChanged(PowerState),
    /// Location authorization changed.
    AuthorizationChanged(Authorization),
    /// Monitoring determined presence for a region.
    RegionStateChanged {
        /// Region the determination is for.
        region: BeaconRegion,
        /// Presence state.
        state: RegionState,
    },
    /// One ranging cycle finished for a constraint.
    RangeUpdate {
        /// Ranged constraint.
        constraint: IdentityConstraint,
        /// Transmitters detected in this cycle, possibly none.
        observations: Vec<Observation>,
    },
}

/// Receiver side of the collaborator callbacks.
pub trait RadioEventHandler {
    /// Radio power changed.
    fn on_power_state_changed(&mut self, state: PowerState);

    /// Monitoring reported presence for a region.
    fn on_region_state_changed(&mut self, region: &BeaconRegion, state: RegionState);

    /// Ranging delivered a batch for a constraint.
    fn on_range_update(&mut self, constraint: IdentityConstraint, observations: Vec<Observation>);

    /// Authorization changed.
    fn on_authorization_changed(&mut self, authorization: Authorization);

    /// Route an event to the matching handler.
    fn dispatch(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::PowerStateChanged(state) => self.on_power_state_changed(state),
            RadioEvent::AuthorizationChanged(auth) => self.on_authorization_changed(auth),
            RadioEvent::RegionStateChanged { region, state } => {
                self.on_region_state_changed(&region, state);
            }
            RadioEvent::RangeUpdate {
                constraint,
                observations,
            } => self.on_range_update(constraint, observations),
        }
    }
}
