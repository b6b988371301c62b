//! The proximity engine facade.
//!
//! [`ProximityEngine`] composes the [`RegionWatcher`], the
//! [`ProximityAggregator`] and the [`BeaconAdvertiser`], owns the radio
//! collaborator, and exposes the application contract. It implements
//! [`RadioEventHandler`], so a host dispatcher can feed it radio events
//! directly.
//!
//! The engine has a single owner and is never shared. Every mutation runs on
//! whichever task owns it, one event at a time; see [`crate::runtime`] for
//! the tokio host that provides that queue.
//!
//! Faults never cross the API as panics or errors once the engine is
//! configured. They are logged and published on the notice channel returned
//! by [`ProximityEngine::subscribe`].

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::advertiser::{AdvertiserError, BeaconAdvertiser};
use crate::aggregator::{ProximityAggregator, ProximityView};
use crate::config::BeaconConfig;
use crate::error::{BeaconError, Result};
use crate::radio::{RadioEventHandler, RadioStack};
use crate::types::{
    Authorization, BeaconIdentity, BeaconRegion, IdentityConstraint, Observation, PowerState,
    RegionState,
};
use crate::watcher::{RangingActiveChanged, RegionWatcher, WatchOutcome, WatchStatus};

const NOTICE_CAPACITY: usize = 64;

/// A non-fatal problem reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineFault {
    /// Authorization is refused; the constraint stays registered but unmonitored.
    AuthorizationDenied {
        /// Affected constraint.
        constraint: IdentityConstraint,
    },
    /// The radio is not powered on; start commands wait for the next power-on.
    RadioUnavailable {
        /// Reported power state.
        power_state: PowerState,
    },
}

impl From<&EngineFault> for BeaconError {
    fn from(fault: &EngineFault) -> Self {
        match fault {
            EngineFault::AuthorizationDenied { constraint } => {
                Self::AuthorizationDenied(constraint.region_identifier())
            }
            EngineFault::RadioUnavailable { power_state } => Self::RadioUnavailable(*power_state),
        }
    }
}

/// Something observable changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineNotice {
    /// The proximity view was rebuilt with different content.
    ViewChanged,
    /// The broadcast started or stopped.
    AdvertisingChanged(bool),
    /// A non-fatal fault occurred.
    Fault(EngineFault),
}

/// Snapshot of the engine, including degraded states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    /// Whether `configure()` has succeeded and `stop()` has not been called.
    pub configured: bool,
    /// Last power state reported by the radio.
    pub power_state: PowerState,
    /// Whether this device is broadcasting.
    pub advertising: bool,
    /// Broadcast identity, once configured.
    pub identity: Option<BeaconIdentity>,
    /// Every watched constraint.
    pub watching: Vec<WatchStatus>,
}

/// Components that live from `configure()` to `stop()`.
#[derive(Debug)]
struct Session {
    watcher: RegionWatcher,
    aggregator: ProximityAggregator,
    advertiser: BeaconAdvertiser,
}

impl Session {
    /// Feed watcher transitions to the aggregator. Returns `true` if the view changed.
    fn route(&mut self, changes: impl IntoIterator<Item = RangingActiveChanged>) -> bool {
        changes
            .into_iter()
            .fold(false, |changed, c| self.aggregator.on_ranging_active_changed(c) || changed)
    }
}

/// Facade over region watching, ranging aggregation and broadcasting.
pub struct ProximityEngine<R> {
    beacon: BeaconConfig,
    radio: R,
    session: Option<Session>,
    power: PowerState,
    notices: broadcast::Sender<EngineNotice>,
}

impl<R: RadioStack> ProximityEngine<R> {
    /// Engine broadcasting the identity in `beacon` through `radio`.
    ///
    /// Nothing is validated or started until [`configure`](Self::configure).
    #[must_use]
    pub fn new(beacon: BeaconConfig, radio: R) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            beacon,
            radio,
            session: None,
            power: PowerState::Unknown,
            notices,
        }
    }

    /// Create the watcher, aggregator and advertiser.
    ///
    /// No radio activity starts until the collaborator reports power-on; if it
    /// already has, the broadcast starts now. Calling this on a configured
    /// engine does nothing.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the namespace UUID does not parse or
    /// no valid broadcast domain is configured.
    pub fn configure(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Engine already configured");
            return Ok(());
        }

        let mut advertiser = BeaconAdvertiser::new(self.beacon.clone());
        advertiser.configure()?;

        self.session = Some(Session {
            watcher: RegionWatcher::new(),
            aggregator: ProximityAggregator::new(),
            advertiser,
        });
        info!(namespace = %self.beacon.namespace_id, "Engine configured");

        // The radio may have powered on before we were configured.
        if self.power.is_powered_on() {
            self.on_power_state_changed(self.power);
        }
        Ok(())
    }

    /// Stop broadcasting, then stop all monitoring and ranging, and drop the
    /// components. Safe in any state.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            debug!("Stop on unconfigured engine");
            return;
        };

        if session.advertiser.stop_broadcasting(&mut self.radio) {
            notify(&self.notices, EngineNotice::AdvertisingChanged(false));
        }

        let had_view = !session.aggregator.current_view().is_empty();
        session.watcher.unwatch_all(&mut self.radio);
        session.aggregator.clear();
        if had_view {
            notify(&self.notices, EngineNotice::ViewChanged);
        }
        info!("Engine stopped");
    }

    /// Watch a constraint.
    ///
    /// Re-watching is a no-op. Refused authorization is not an error: the
    /// constraint stays registered, and a fault is published.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::NotConfigured`] before `configure()`.
    pub fn watch(&mut self, constraint: IdentityConstraint) -> Result<WatchOutcome> {
        let session = self.session.as_mut().ok_or(BeaconError::NotConfigured)?;
        let outcome = session.watcher.watch(&mut self.radio, constraint);
        if outcome == WatchOutcome::Denied {
            notify(
                &self.notices,
                EngineNotice::Fault(EngineFault::AuthorizationDenied { constraint }),
            );
        }
        Ok(outcome)
    }

    /// Stop watching everything. Safe to call repeatedly and before `configure()`.
    pub fn unwatch_all(&mut self) {
        if let Some(session) = self.session.as_mut() {
            let changes = session.watcher.unwatch_all(&mut self.radio);
            if session.route(changes) {
                notify(&self.notices, EngineNotice::ViewChanged);
            }
        }
    }

    /// Stop broadcasting. Safe to call repeatedly and before `configure()`.
    pub fn stop_broadcasting(&mut self) {
        if let Some(session) = self.session.as_mut() {
            if session.advertiser.stop_broadcasting(&mut self.radio) {
                notify(&self.notices, EngineNotice::AdvertisingChanged(false));
            }
        }
    }

    /// The current bucketed view. Empty when unconfigured.
    #[must_use]
    pub fn current_proximity_view(&self) -> ProximityView {
        self.session
            .as_ref()
            .map(|s| s.aggregator.current_view().clone())
            .unwrap_or_default()
    }

    /// Snapshot of the engine state.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let session = self.session.as_ref();
        EngineStatus {
            configured: session.is_some(),
            power_state: self.power,
            advertising: session.is_some_and(|s| s.advertiser.is_broadcasting()),
            identity: session.and_then(|s| s.advertiser.identity()),
            watching: session.map(|s| s.watcher.statuses()).unwrap_or_default(),
        }
    }

    /// Subscribe to notices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }

    /// The radio collaborator.
    #[must_use]
    pub const fn radio(&self) -> &R {
        &self.radio
    }

    /// Mutable access to the radio collaborator.
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

impl<R: RadioStack> RadioEventHandler for ProximityEngine<R> {
    fn on_power_state_changed(&mut self, state: PowerState) {
        self.power = state;
        let Some(session) = self.session.as_mut() else {
            debug!(?state, "Power event before configure, ignoring");
            return;
        };

        let was_advertising = session.advertiser.is_broadcasting();
        match session.advertiser.on_radio_power_state_changed(&mut self.radio, state) {
            Ok(()) | Err(AdvertiserError::RadioUnavailable(_)) => {}
            Err(e) => debug!(error = %e, "Broadcast not started"),
        }
        let advertising = session.advertiser.is_broadcasting();

        let changes = session.watcher.set_radio_ready(&mut self.radio, state.is_powered_on());
        let view_changed = session.route(changes);

        if was_advertising != advertising {
            notify(&self.notices, EngineNotice::AdvertisingChanged(advertising));
        }
        if view_changed {
            notify(&self.notices, EngineNotice::ViewChanged);
        }
        if !state.is_powered_on() {
            notify(
                &self.notices,
                EngineNotice::Fault(EngineFault::RadioUnavailable { power_state: state }),
            );
        }
    }

    fn on_region_state_changed(&mut self, region: &BeaconRegion, state: RegionState) {
        let Some(session) = self.session.as_mut() else {
            debug!(region = %region.identifier, "Region event before configure, ignoring");
            return;
        };
        let change = session
            .watcher
            .on_region_state_changed(&mut self.radio, region, state);
        if session.route(change) {
            notify(&self.notices, EngineNotice::ViewChanged);
        }
    }

    fn on_range_update(&mut self, constraint: IdentityConstraint, observations: Vec<Observation>) {
        let Some(session) = self.session.as_mut() else {
            debug!(constraint = %constraint, "Range update before configure, ignoring");
            return;
        };
        if session.aggregator.on_range_update(constraint, observations) {
            notify(&self.notices, EngineNotice::ViewChanged);
        }
    }

    fn on_authorization_changed(&mut self, authorization: Authorization) {
        let Some(session) = self.session.as_mut() else {
            debug!(?authorization, "Authorization event before configure, ignoring");
            return;
        };
        let changes = session
            .watcher
            .on_authorization_changed(&mut self.radio, authorization);
        if session.route(changes) {
            notify(&self.notices, EngineNotice::ViewChanged);
        }
        if authorization.is_refused() {
            for status in session.watcher.statuses() {
                notify(
                    &self.notices,
                    EngineNotice::Fault(EngineFault::AuthorizationDenied {
                        constraint: status.constraint,
                    }),
                );
            }
        }
    }
}

/// Publish a notice; having no subscribers is fine.
fn notify(tx: &broadcast::Sender<EngineNotice>, notice: EngineNotice) {
    let _ = tx.send(notice);
}
