//! Region monitoring and ranging lifecycle.
//!
//! [`RegionWatcher`] owns the set of watched constraints and the
//! [`WatchState`] of each. It issues monitor and range commands to the radio
//! stack and reports every ranging transition as a [`RangingActiveChanged`]
//! so the aggregator knows which constraints have live data.
//!
//! ```text
//!              watch (radio off / denied)
//!   (new) ──────────────────────────────► Requested
//!     │                                     │  power on / authorized
//!     │ watch (radio on)                    ▼
//!     └───────────────────────────────► Monitoring ◄──┐
//!                                           │         │ outside / unknown
//!                                    inside │         │
//!                                           ▼         │
//!                                      RangingActive ─┘
//! ```
//!
//! Ranging is only ever active for a constraint that is also monitored;
//! every path out of `Monitoring` stops ranging first.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::radio::RadioStack;
use crate::types::{Authorization, BeaconRegion, IdentityConstraint, RegionState};

/// Lifecycle state of one watched constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Registered, but no monitor command has been issued.
    Requested,
    /// Monitored, ranging inactive.
    Monitoring,
    /// Monitored and ranging.
    RangingActive,
}

impl WatchState {
    const fn is_monitored(self) -> bool {
        matches!(self, Self::Monitoring | Self::RangingActive)
    }
}

/// A ranging transition for one constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangingActiveChanged {
    /// Constraint whose ranging changed.
    pub constraint: IdentityConstraint,
    /// Whether ranging is now active.
    pub active: bool,
}

/// Result of a [`RegionWatcher::watch`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Registered and monitor-start issued.
    Monitoring,
    /// Registered; monitoring starts on the next power-on.
    Deferred,
    /// Registered, but authorization is refused.
    Denied,
    /// Already watched; nothing changed.
    AlreadyWatched,
}

/// Externally visible state of one watched constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchStatus {
    /// Watched constraint.
    pub constraint: IdentityConstraint,
    /// Lifecycle state.
    pub state: WatchState,
    /// Whether authorization permits monitoring it.
    pub authorized: bool,
}

#[derive(Debug)]
struct WatchEntry {
    region: BeaconRegion,
    state: WatchState,
    authorized: bool,
}

/// Owner of the watch set and its per-constraint state machine.
#[derive(Debug, Default)]
pub struct RegionWatcher {
    entries: HashMap<IdentityConstraint, WatchEntry>,
    radio_ready: bool,
}

impl RegionWatcher {
    /// Empty watcher; the radio is assumed not ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constraint and start monitoring it when possible.
    ///
    /// Watching an already-watched constraint is a no-op. A refused
    /// authorization is logged and leaves the constraint registered as
    /// [`WatchState::Requested`].
    pub fn watch<R: RadioStack>(
        &mut self,
        radio: &mut R,
        constraint: IdentityConstraint,
    ) -> WatchOutcome {
        if self.entries.contains_key(&constraint) {
            debug!(constraint = %constraint, "Constraint already watched");
            return WatchOutcome::AlreadyWatched;
        }

        let authorization = radio.authorization();
        if authorization == Authorization::NotDetermined {
            radio.request_authorization();
        }

        let mut entry = WatchEntry {
            region: BeaconRegion::for_constraint(constraint),
            state: WatchState::Requested,
            authorized: !authorization.is_refused(),
        };

        let outcome = if !entry.authorized {
            warn!(
                constraint = %constraint,
                ?authorization,
                "Authorization refused, not monitoring"
            );
            WatchOutcome::Denied
        } else if self.radio_ready {
            radio.start_monitoring(&entry.region);
            entry.state = WatchState::Monitoring;
            info!(constraint = %constraint, "Monitoring started");
            WatchOutcome::Monitoring
        } else {
            info!(constraint = %constraint, "Radio not ready, monitoring deferred");
            WatchOutcome::Deferred
        };

        self.entries.insert(constraint, entry);
        outcome
    }

    /// Stop ranging and monitoring for everything and clear the watch set.
    ///
    /// Safe to call repeatedly. Returns a deactivation for every constraint
    /// that was ranging.
    pub fn unwatch_all<R: RadioStack>(&mut self, radio: &mut R) -> Vec<RangingActiveChanged> {
        let mut changes = Vec::new();
        for (constraint, entry) in self.entries.drain() {
            if entry.state == WatchState::RangingActive {
                radio.stop_ranging(&constraint);
                changes.push(RangingActiveChanged {
                    constraint,
                    active: false,
                });
            }
            if entry.state.is_monitored() {
                radio.stop_monitoring(&entry.region);
            }
        }
        if !changes.is_empty() {
            info!(stopped = changes.len(), "Ranging stopped for all regions");
        }
        changes
    }

    /// Apply a presence determination from monitoring.
    ///
    /// `Unknown` is handled as `Outside`: ranging only runs after a
    /// definitive `Inside`.
    pub fn on_region_state_changed<R: RadioStack>(
        &mut self,
        radio: &mut R,
        region: &BeaconRegion,
        state: RegionState,
    ) -> Option<RangingActiveChanged> {
        let constraint = region.constraint;
        let Some(entry) = self.entries.get_mut(&constraint) else {
            debug!(region = %region.identifier, "Region event for unwatched constraint");
            return None;
        };

        match (entry.state, state) {
            (WatchState::Requested, _) => {
                debug!(region = %region.identifier, "Region event before monitoring started");
                None
            }
            (WatchState::Monitoring, RegionState::Inside) => {
                radio.start_ranging(&constraint);
                entry.state = WatchState::RangingActive;
                info!(constraint = %constraint, "Entered region, ranging started");
                Some(RangingActiveChanged {
                    constraint,
                    active: true,
                })
            }
            (WatchState::RangingActive, RegionState::Outside | RegionState::Unknown) => {
                radio.stop_ranging(&constraint);
                entry.state = WatchState::Monitoring;
                info!(constraint = %constraint, ?state, "Left region, ranging stopped");
                Some(RangingActiveChanged {
                    constraint,
                    active: false,
                })
            }
            _ => None,
        }
    }

    /// Track radio readiness.
    ///
    /// Becoming ready starts monitoring for every authorized constraint still
    /// in `Requested`. Losing readiness drops every constraint back to
    /// `Requested` without issuing stop commands, since the hardware has
    /// already halted.
    pub fn set_radio_ready<R: RadioStack>(
        &mut self,
        radio: &mut R,
        ready: bool,
    ) -> Vec<RangingActiveChanged> {
        let was_ready = std::mem::replace(&mut self.radio_ready, ready);
        let mut changes = Vec::new();

        if ready && !was_ready {
            for entry in self.entries.values_mut() {
                if entry.authorized && entry.state == WatchState::Requested {
                    radio.start_monitoring(&entry.region);
                    entry.state = WatchState::Monitoring;
                }
            }
            info!(watched = self.entries.len(), "Radio ready, monitoring resumed");
        } else if !ready && was_ready {
            for (constraint, entry) in &mut self.entries {
                if entry.state == WatchState::RangingActive {
                    changes.push(RangingActiveChanged {
                        constraint: *constraint,
                        active: false,
                    });
                }
                entry.state = WatchState::Requested;
            }
            warn!(watched = self.entries.len(), "Radio unavailable, monitoring suspended");
        }
        changes
    }

    /// Apply an authorization change.
    ///
    /// A refusal stops everything and marks every constraint unauthorized.
    /// Only [`Authorization::Authorized`] starts monitoring for the
    /// constraints that were waiting; an undetermined answer changes nothing.
    pub fn on_authorization_changed<R: RadioStack>(
        &mut self,
        radio: &mut R,
        authorization: Authorization,
    ) -> Vec<RangingActiveChanged> {
        let mut changes = Vec::new();

        if authorization.is_refused() {
            for (constraint, entry) in &mut self.entries {
                if entry.state == WatchState::RangingActive {
                    radio.stop_ranging(constraint);
                    changes.push(RangingActiveChanged {
                        constraint: *constraint,
                        active: false,
                    });
                }
                if entry.state.is_monitored() {
                    radio.stop_monitoring(&entry.region);
                }
                entry.state = WatchState::Requested;
                entry.authorized = false;
            }
            warn!(?authorization, "Authorization revoked, monitoring stopped");
            return changes;
        }
        if authorization != Authorization::Authorized {
            debug!(?authorization, "Authorization not granted yet, nothing to start");
            return changes;
        }

        for entry in self.entries.values_mut().filter(|e| !e.authorized) {
            entry.authorized = true;
            if self.radio_ready {
                radio.start_monitoring(&entry.region);
                entry.state = WatchState::Monitoring;
            }
        }
        changes
    }

    /// State of a watched constraint.
    #[must_use]
    pub fn state(&self, constraint: &IdentityConstraint) -> Option<WatchState> {
        self.entries.get(constraint).map(|e| e.state)
    }

    /// Whether the constraint is in the watch set.
    #[must_use]
    pub fn is_watching(&self, constraint: &IdentityConstraint) -> bool {
        self.entries.contains_key(constraint)
    }

    /// Number of watched constraints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is watched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Status of every watched constraint, ordered by constraint.
    #[must_use]
    pub fn statuses(&self) -> Vec<WatchStatus> {
        let mut out: Vec<WatchStatus> = self
            .entries
            .iter()
            .map(|(constraint, entry)| WatchStatus {
                constraint: *constraint,
                state: entry.state,
                authorized: entry.authorized,
            })
            .collect();
        out.sort_by_key(|s| s.constraint);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::mock::MockRadio;
    use crate::radio::RadioCommand;
    use uuid::Uuid;

    fn constraint(n: u128) -> IdentityConstraint {
        IdentityConstraint::new(Uuid::from_u128(n))
    }

    fn ready_watcher(radio: &mut MockRadio) -> RegionWatcher {
        let mut watcher = RegionWatcher::new();
        watcher.set_radio_ready(radio, true);
        watcher
    }

    fn region_event(
        watcher: &mut RegionWatcher,
        radio: &mut MockRadio,
        c: IdentityConstraint,
        state: RegionState,
    ) -> Option<RangingActiveChanged> {
        watcher.on_region_state_changed(radio, &BeaconRegion::for_constraint(c), state)
    }

    #[test]
    fn test_watch_is_idempotent() {
        let mut radio = MockRadio::authorized();
        let mut watcher = ready_watcher(&mut radio);
        let c = constraint(1);

        assert_eq!(watcher.watch(&mut radio, c), WatchOutcome::Monitoring);
        assert_eq!(watcher.watch(&mut radio, c), WatchOutcome::AlreadyWatched);

        assert_eq!(watcher.len(), 1);
        assert_eq!(
            radio.count(|cmd| matches!(cmd, RadioCommand::StartMonitoring(_))),
            1
        );
    }

    #[test]
    fn test_watch_requests_authorization_when_undetermined() {
        let mut radio = MockRadio::default();
        let mut watcher = ready_watcher(&mut radio);

        assert_eq!(watcher.watch(&mut radio, constraint(1)), WatchOutcome::Monitoring);
        assert_eq!(radio.commands()[0], RadioCommand::RequestAuthorization);
    }

    #[test]
    fn test_watch_denied_keeps_constraint_requested() {
        let mut radio = MockRadio::with_authorization(Authorization::Denied);
        let mut watcher = ready_watcher(&mut radio);
        let c = constraint(1);

        assert_eq!(watcher.watch(&mut radio, c), WatchOutcome::Denied);
        assert_eq!(watcher.state(&c), Some(WatchState::Requested));
        assert!(!watcher.statuses()[0].authorized);
        assert!(radio.commands().is_empty());
    }

    #[test]
    fn test_watch_before_radio_ready_is_deferred() {
        let mut radio = MockRadio::authorized();
        let mut watcher = RegionWatcher::new();
        let c = constraint(1);

        assert_eq!(watcher.watch(&mut radio, c), WatchOutcome::Deferred);
        assert!(radio.commands().is_empty());

        watcher.set_radio_ready(&mut radio, true);
        assert_eq!(watcher.state(&c), Some(WatchState::Monitoring));
        assert_eq!(
            radio.commands(),
            &[RadioCommand::StartMonitoring(BeaconRegion::for_constraint(c))]
        );
    }

    #[test]
    fn test_inside_outside_cycle_issues_one_command_each() {
        let mut radio = MockRadio::authorized();
        let mut watcher = ready_watcher(&mut radio);
        let c = constraint(1);
        watcher.watch(&mut radio, c);

        assert_eq!(region_event(&mut watcher, &mut radio, c, RegionState::Outside), None);
        let entered = region_event(&mut watcher, &mut radio, c, RegionState::Inside);
        assert_eq!(
            entered,
            Some(RangingActiveChanged {
                constraint: c,
                active: true
            })
        );
        assert_eq!(region_event(&mut watcher, &mut radio, c, RegionState::Inside), None);

        let left = region_event(&mut watcher, &mut radio, c, RegionState::Outside);
        assert_eq!(left.map(|e| e.active), Some(false));

        assert_eq!(radio.count(|cmd| matches!(cmd, RadioCommand::StartRanging(_))), 1);
        assert_eq!(radio.count(|cmd| matches!(cmd, RadioCommand::StopRanging(_))), 1);
        assert_eq!(watcher.state(&c), Some(WatchState::Monitoring));
    }

    #[test]
    fn test_unknown_region_state_never_starts_ranging() {
        let mut radio = MockRadio::authorized();
        let mut watcher = ready_watcher(&mut radio);
        let c = constraint(1);
        watcher.watch(&mut radio, c);

        assert_eq!(region_event(&mut watcher, &mut radio, c, RegionState::Unknown), None);
        region_event(&mut watcher, &mut radio, c, RegionState::Inside);
        let change = region_event(&mut watcher, &mut radio, c, RegionState::Unknown);

        assert_eq!(change.map(|e| e.active), Some(false));
        assert_eq!(watcher.state(&c), Some(WatchState::Monitoring));
    }

    #[test]
    fn test_events_for_unwatched_regions_are_ignored() {
        let mut radio = MockRadio::authorized();
        let mut watcher = ready_watcher(&mut radio);

        assert_eq!(
            region_event(&mut watcher, &mut radio, constraint(7), RegionState::Inside),
            None
        );
        assert!(radio.commands().is_empty());
    }

    #[test]
    fn test_unwatch_all_stops_ranging_before_monitoring() {
        let mut radio = MockRadio::authorized();
        let mut watcher = ready_watcher(&mut radio);
        let c = constraint(1);
        watcher.watch(&mut radio, c);
        region_event(&mut watcher, &mut radio, c, RegionState::Inside);
        radio.take_commands();

        let changes = watcher.unwatch_all(&mut radio);

        assert_eq!(changes.len(), 1);
        assert_eq!(
            radio.commands(),
            &[
                RadioCommand::StopRanging(c),
                RadioCommand::StopMonitoring(BeaconRegion::for_constraint(c)),
            ]
        );
        assert!(watcher.is_empty());
    }

    #[test]
    fn test_unwatch_all_twice_is_safe() {
        let mut radio = MockRadio::authorized();
        let mut watcher = ready_watcher(&mut radio);
        watcher.watch(&mut radio, constraint(1));
        watcher.watch(&mut radio, constraint(2));

        watcher.unwatch_all(&mut radio);
        assert!(watcher.is_empty());
        radio.take_commands();

        assert!(watcher.unwatch_all(&mut radio).is_empty());
        assert!(watcher.is_empty());
        assert!(radio.commands().is_empty());
    }

    #[test]
    fn test_radio_loss_reports_ranging_inactive_without_commands() {
        let mut radio = MockRadio::authorized();
        let mut watcher = ready_watcher(&mut radio);
        let c = constraint(1);
        watcher.watch(&mut radio, c);
        region_event(&mut watcher, &mut radio, c, RegionState::Inside);
        radio.take_commands();

        let changes = watcher.set_radio_ready(&mut radio, false);

        assert_eq!(changes.len(), 1);
        assert!(!changes[0].active);
        assert!(radio.commands().is_empty());
        assert_eq!(watcher.state(&c), Some(WatchState::Requested));
    }

    #[test]
    fn test_authorization_grant_starts_waiting_constraints() {
        let mut radio = MockRadio::with_authorization(Authorization::Denied);
        let mut watcher = ready_watcher(&mut radio);
        let c = constraint(1);
        watcher.watch(&mut radio, c);

        watcher.on_authorization_changed(&mut radio, Authorization::Authorized);

        assert_eq!(watcher.state(&c), Some(WatchState::Monitoring));
        assert!(watcher.statuses()[0].authorized);
    }

    #[test]
    fn test_authorization_revocation_stops_everything() {
        let mut radio = MockRadio::authorized();
        let mut watcher = ready_watcher(&mut radio);
        let c = constraint(1);
        watcher.watch(&mut radio, c);
        region_event(&mut watcher, &mut radio, c, RegionState::Inside);
        radio.take_commands();

        let changes = watcher.on_authorization_changed(&mut radio, Authorization::Denied);

        assert_eq!(changes.len(), 1);
        assert_eq!(radio.commands().len(), 2);
        assert_eq!(watcher.state(&c), Some(WatchState::Requested));
        assert!(!watcher.statuses()[0].authorized);
    }

    #[test]
    fn test_undetermined_authorization_does_not_promote_denied_constraint() {
        let mut radio = MockRadio::with_authorization(Authorization::Denied);
        let mut watcher = ready_watcher(&mut radio);
        let c = constraint(1);
        assert_eq!(watcher.watch(&mut radio, c), WatchOutcome::Denied);

        radio.set_authorization(Authorization::NotDetermined);
        let changes = watcher.on_authorization_changed(&mut radio, Authorization::NotDetermined);

        assert!(changes.is_empty());
        assert!(watcher.is_watching(&c));
        assert_eq!(watcher.state(&c), Some(WatchState::Requested));
        assert!(!watcher.statuses()[0].authorized);
        assert!(radio.commands().is_empty());

        radio.set_authorization(Authorization::Authorized);
        watcher.on_authorization_changed(&mut radio, Authorization::Authorized);

        assert_eq!(watcher.state(&c), Some(WatchState::Monitoring));
        assert_eq!(
            radio.count(|cmd| matches!(cmd, RadioCommand::StartMonitoring(_))),
            1
        );
    }
}
