//! BlueZ radio collaborator (Linux, via `bluer`).
//!
//! [`BluezRadio`] is the command side: it forwards each command to a driver
//! task and returns immediately. The [`BluezDriver`] owns the `bluer` session
//! and reports back through a [`RadioEventSink`]:
//!
//! - adapter power as [`RadioEvent::PowerStateChanged`]
//! - region presence from iBeacon sightings during discovery; a region is
//!   `inside` on its first matching sighting and `outside` once no sighting
//!   arrived for `region_exit_timeout_secs`
//! - one [`RadioEvent::RangeUpdate`] per ranging interval per ranged
//!   constraint, bucketed with [`estimate_proximity`]
//!
//! BlueZ has no per-application location permission, so authorization is
//! always reported as granted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::pin::Pin;
use std::time::{Duration, Instant};

use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, Session};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RadioConfig;
use crate::error::{BeaconError, Result};
use crate::radio::ibeacon::{estimate_proximity, IBeaconFrame, APPLE_COMPANY_ID};
use crate::radio::{AdvertisementPayload, RadioCommand, RadioEvent, RadioStack};
use crate::runtime::RadioEventSink;
use crate::types::{
    Authorization, BeaconRegion, IdentityConstraint, Observation, PowerState, RegionState,
};

type EventStream = Pin<Box<dyn Stream<Item = AdapterEvent> + Send>>;

/// Ranging uses sightings no older than this many ranging intervals.
const RANGING_WINDOW_INTERVALS: u32 = 3;

impl From<bluer::Error> for BeaconError {
    fn from(err: bluer::Error) -> Self {
        Self::Bluetooth(err.to_string())
    }
}

/// Command side of the BlueZ collaborator.
#[derive(Debug, Clone)]
pub struct BluezRadio {
    tx: mpsc::UnboundedSender<RadioCommand>,
}

impl BluezRadio {
    /// Open the default adapter.
    ///
    /// Commands queue until the returned [`BluezDriver`] is spawned.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconError::Bluetooth`] if BlueZ is unreachable or no adapter
    /// exists.
    pub async fn connect(config: &RadioConfig) -> Result<(Self, BluezDriver)> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        info!(adapter = adapter.name(), "Using Bluetooth adapter");

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = BluezDriver {
            session,
            adapter,
            commands: rx,
            exit_timeout: Duration::from_secs(config.region_exit_timeout_secs),
            ranging_interval: Duration::from_millis(config.ranging_interval_ms.max(1)),
        };
        Ok((Self { tx }, driver))
    }

    fn send(&self, command: RadioCommand) {
        if self.tx.send(command).is_err() {
            warn!("Bluetooth driver is gone, command dropped");
        }
    }
}

impl RadioStack for BluezRadio {
    fn authorization(&self) -> Authorization {
        Authorization::Authorized
    }

    fn request_authorization(&mut self) {
        self.send(RadioCommand::RequestAuthorization);
    }

    fn start_monitoring(&mut self, region: &BeaconRegion) {
        self.send(RadioCommand::StartMonitoring(region.clone()));
    }

    fn stop_monitoring(&mut self, region: &BeaconRegion) {
        self.send(RadioCommand::StopMonitoring(region.clone()));
    }

    fn start_ranging(&mut self, constraint: &IdentityConstraint) {
        self.send(RadioCommand::StartRanging(*constraint));
    }

    fn stop_ranging(&mut self, constraint: &IdentityConstraint) {
        self.send(RadioCommand::StopRanging(*constraint));
    }

    fn start_advertising(&mut self, payload: &AdvertisementPayload) {
        self.send(RadioCommand::StartAdvertising(payload.clone()));
    }

    fn stop_advertising(&mut self) {
        self.send(RadioCommand::StopAdvertising);
    }
}

/// Event side of the BlueZ collaborator, not yet running.
pub struct BluezDriver {
    session: Session,
    adapter: Adapter,
    commands: mpsc::UnboundedReceiver<RadioCommand>,
    exit_timeout: Duration,
    ranging_interval: Duration,
}

impl std::fmt::Debug for BluezDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezDriver")
            .field("adapter", &self.adapter.name())
            .field("exit_timeout", &self.exit_timeout)
            .field("ranging_interval", &self.ranging_interval)
            .finish_non_exhaustive()
    }
}

impl BluezDriver {
    /// Start reporting to `sink`.
    ///
    /// The current authorization and power state are reported first. The task
    /// ends when every [`BluezRadio`] clone is dropped or the engine closes.
    /// D-Bus failures for a single device or command are logged and skipped.
    pub fn spawn(self, sink: RadioEventSink) -> JoinHandle<()> {
        let driver = Driver {
            _session: self.session,
            adapter: self.adapter,
            sink,
            commands: self.commands,
            ranging_interval: self.ranging_interval,
            advertisement: None,
            discovery: None,
            tracker: Tracker::new(self.exit_timeout, self.ranging_interval),
        };
        tokio::spawn(async move {
            if let Err(e) = driver.run().await {
                warn!(error = %e, "Bluetooth driver stopped");
            }
        })
    }
}

#[derive(Debug)]
struct RegionTrack {
    region: BeaconRegion,
    inside: bool,
    last_seen: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
struct Sighting {
    uuid: Uuid,
    major: u16,
    minor: u16,
    rssi: Option<i16>,
    measured_power: i8,
    seen_at: Instant,
}

/// Decoded iBeacon advertisement of one device.
#[derive(Debug, Clone, Copy)]
struct Reading {
    frame: IBeaconFrame,
    rssi: Option<i16>,
}

/// Region presence and ranging state derived from discovery sightings.
#[derive(Debug)]
struct Tracker {
    exit_timeout: Duration,
    ranging_window: Duration,
    regions: HashMap<IdentityConstraint, RegionTrack>,
    ranging: HashSet<IdentityConstraint>,
    sightings: HashMap<Address, Sighting>,
}

impl Tracker {
    fn new(exit_timeout: Duration, ranging_interval: Duration) -> Self {
        Self {
            exit_timeout,
            ranging_window: ranging_interval * RANGING_WINDOW_INTERVALS,
            regions: HashMap::new(),
            ranging: HashSet::new(),
            sightings: HashMap::new(),
        }
    }

    fn monitor(&mut self, region: BeaconRegion) {
        self.regions.insert(
            region.constraint,
            RegionTrack {
                region,
                inside: false,
                last_seen: None,
            },
        );
    }

    /// Returns `true` once nothing is monitored any more.
    fn unmonitor(&mut self, region: &BeaconRegion) -> bool {
        self.regions.remove(&region.constraint);
        self.ranging.remove(&region.constraint);
        if self.regions.is_empty() {
            self.sightings.clear();
        }
        self.regions.is_empty()
    }

    fn clear(&mut self) {
        self.regions.clear();
        self.ranging.clear();
        self.sightings.clear();
    }

    /// Store a sighting and report every region it enters.
    ///
    /// A failed read is skipped; devices routinely vanish mid-discovery.
    fn record(
        &mut self,
        address: Address,
        reading: bluer::Result<Option<Reading>>,
        now: Instant,
    ) -> Vec<RadioEvent> {
        let reading = match reading {
            Ok(Some(reading)) => reading,
            Ok(None) => return Vec::new(),
            Err(e) => {
                debug!(%address, error = %e, "Skipping unreadable device");
                return Vec::new();
            }
        };

        let id = reading.frame.identity;
        self.sightings.insert(
            address,
            Sighting {
                uuid: id.uuid,
                major: id.major,
                minor: id.minor,
                rssi: reading.rssi,
                measured_power: reading.frame.measured_power,
                seen_at: now,
            },
        );

        let mut entered = Vec::new();
        for track in self.regions.values_mut() {
            if track.region.constraint.matches(id.uuid, id.major, id.minor) {
                track.last_seen = Some(now);
                if !track.inside {
                    track.inside = true;
                    entered.push(RadioEvent::RegionStateChanged {
                        region: track.region.clone(),
                        state: RegionState::Inside,
                    });
                }
            }
        }
        entered
    }

    /// Exits for stale regions, then one range batch per ranged constraint.
    fn tick(&mut self, now: Instant) -> Vec<RadioEvent> {
        let exit_timeout = self.exit_timeout;
        let mut events = Vec::new();

        for track in self.regions.values_mut() {
            let stale = track
                .last_seen
                .map_or(true, |seen| now.duration_since(seen) >= exit_timeout);
            if track.inside && stale {
                track.inside = false;
                events.push(RadioEvent::RegionStateChanged {
                    region: track.region.clone(),
                    state: RegionState::Outside,
                });
            }
        }

        self.sightings
            .retain(|_, s| now.duration_since(s.seen_at) < exit_timeout);

        for constraint in &self.ranging {
            let observations = self
                .sightings
                .values()
                .filter(|s| now.duration_since(s.seen_at) < self.ranging_window)
                .filter(|s| constraint.matches(s.uuid, s.major, s.minor))
                .map(|s| Observation {
                    constraint: *constraint,
                    major: s.major,
                    minor: s.minor,
                    proximity: estimate_proximity(s.rssi, s.measured_power),
                    rssi: s.rssi,
                    observed_at: s.seen_at,
                })
                .collect();
            events.push(RadioEvent::RangeUpdate {
                constraint: *constraint,
                observations,
            });
        }
        events
    }
}

struct Driver {
    _session: Session,
    adapter: Adapter,
    sink: RadioEventSink,
    commands: mpsc::UnboundedReceiver<RadioCommand>,
    ranging_interval: Duration,
    advertisement: Option<AdvertisementHandle>,
    discovery: Option<EventStream>,
    tracker: Tracker,
}

impl Driver {
    /// Runs until the command channel closes. Only a closed engine is an error.
    async fn run(mut self) -> Result<()> {
        let mut adapter_events: EventStream = Box::pin(self.adapter.events().await?);
        let mut ticker = tokio::time::interval(self.ranging_interval);

        let powered = self.adapter.is_powered().await?;
        self.emit(RadioEvent::AuthorizationChanged(Authorization::Authorized))
            .await?;
        self.emit(RadioEvent::PowerStateChanged(power_state(powered)))
            .await?;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await?,
                    None => break,
                },
                Some(event) = adapter_events.next() => {
                    if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(on)) = event {
                        self.handle_power(on).await?;
                    }
                }
                Some(event) = next_discovery(&mut self.discovery) => {
                    if let AdapterEvent::DeviceAdded(address) = event {
                        let reading = self.read_device(address).await;
                        let events = self.tracker.record(address, reading, Instant::now());
                        self.emit_all(events).await?;
                    }
                }
                _ = ticker.tick() => {
                    let events = self.tracker.tick(Instant::now());
                    self.emit_all(events).await?;
                }
            }
        }

        debug!("Command channel closed, Bluetooth driver exiting");
        Ok(())
    }

    async fn emit(&self, event: RadioEvent) -> Result<()> {
        self.sink.send(event).await
    }

    async fn emit_all(&self, events: Vec<RadioEvent>) -> Result<()> {
        for event in events {
            self.emit(event).await?;
        }
        Ok(())
    }

    async fn handle_command(&mut self, command: RadioCommand) -> Result<()> {
        match command {
            RadioCommand::RequestAuthorization => {
                self.emit(RadioEvent::AuthorizationChanged(Authorization::Authorized))
                    .await?;
            }
            RadioCommand::StartMonitoring(region) => {
                self.tracker.monitor(region);
                if let Err(e) = self.ensure_discovery().await {
                    warn!(error = %e, "Discovery could not be started");
                }
            }
            RadioCommand::StopMonitoring(region) => {
                if self.tracker.unmonitor(&region) {
                    self.discovery = None;
                    debug!("Discovery stopped");
                }
            }
            RadioCommand::StartRanging(constraint) => {
                self.tracker.ranging.insert(constraint);
            }
            RadioCommand::StopRanging(constraint) => {
                self.tracker.ranging.remove(&constraint);
            }
            RadioCommand::StartAdvertising(payload) => {
                let frame = IBeaconFrame::new(payload.identity, payload.measured_power);
                let advertisement = Advertisement {
                    advertisement_type: AdvertisementType::Broadcast,
                    manufacturer_data: BTreeMap::from([(APPLE_COMPANY_ID, frame.encode())]),
                    ..Default::default()
                };
                self.advertisement = None;
                match self.adapter.advertise(advertisement).await {
                    Ok(handle) => {
                        self.advertisement = Some(handle);
                        info!(region = %payload.region_identifier, "Advertisement registered");
                    }
                    Err(e) => warn!(error = %e, "Advertisement rejected by BlueZ"),
                }
            }
            RadioCommand::StopAdvertising => {
                self.advertisement = None;
            }
        }
        Ok(())
    }

    async fn ensure_discovery(&mut self) -> bluer::Result<()> {
        if self.discovery.is_none() {
            let stream = self.adapter.discover_devices_with_changes().await?;
            self.discovery = Some(Box::pin(stream));
            debug!("Discovery started");
        }
        Ok(())
    }

    async fn handle_power(&mut self, powered: bool) -> Result<()> {
        if !powered {
            // The adapter dropped everything; the engine re-issues on power-on.
            self.advertisement = None;
            self.discovery = None;
            self.tracker.clear();
        }
        self.emit(RadioEvent::PowerStateChanged(power_state(powered)))
            .await
    }

    async fn read_device(&self, address: Address) -> bluer::Result<Option<Reading>> {
        let device = self.adapter.device(address)?;
        let Some(data) = device.manufacturer_data().await? else {
            return Ok(None);
        };
        let Some(frame) = data
            .get(&APPLE_COMPANY_ID)
            .and_then(|bytes| IBeaconFrame::decode(bytes).ok())
        else {
            return Ok(None);
        };
        let rssi = device.rssi().await?;
        Ok(Some(Reading { frame, rssi }))
    }
}

async fn next_discovery(discovery: &mut Option<EventStream>) -> Option<AdapterEvent> {
    match discovery.as_mut() {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

const fn power_state(powered: bool) -> PowerState {
    if powered {
        PowerState::PoweredOn
    } else {
        PowerState::PoweredOff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BeaconIdentity;

    const INTERVAL: Duration = Duration::from_secs(1);
    const EXIT: Duration = Duration::from_secs(30);

    fn reading(major: u16, minor: u16, rssi: i16) -> Reading {
        let identity = BeaconIdentity {
            uuid: Uuid::from_u128(1),
            major,
            minor,
        };
        Reading {
            frame: IBeaconFrame::new(identity, Some(-59)),
            rssi: Some(rssi),
        }
    }

    fn monitored(constraint: IdentityConstraint) -> Tracker {
        let mut tracker = Tracker::new(EXIT, INTERVAL);
        tracker.monitor(BeaconRegion::for_constraint(constraint));
        tracker
    }

    #[test]
    fn test_unreadable_device_is_skipped() {
        let c = IdentityConstraint::new(Uuid::from_u128(1));
        let mut tracker = monitored(c);
        let address = Address::new([1, 2, 3, 4, 5, 6]);
        let gone = bluer::Error {
            kind: bluer::ErrorKind::Failed,
            message: "device vanished".to_string(),
        };

        assert!(tracker.record(address, Err(gone), Instant::now()).is_empty());
        assert!(tracker.sightings.is_empty());

        let events = tracker.record(address, Ok(Some(reading(1, 2, -60))), Instant::now());
        assert!(matches!(
            events.as_slice(),
            [RadioEvent::RegionStateChanged {
                state: RegionState::Inside,
                ..
            }]
        ));
    }

    #[test]
    fn test_first_sighting_enters_once() {
        let c = IdentityConstraint::new(Uuid::from_u128(1));
        let mut tracker = monitored(c);
        let now = Instant::now();

        let first = tracker.record(Address::new([1; 6]), Ok(Some(reading(1, 1, -60))), now);
        let second = tracker.record(Address::new([2; 6]), Ok(Some(reading(1, 2, -60))), now);

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn test_tick_ranges_then_exits_stale_region() {
        let c = IdentityConstraint::new(Uuid::from_u128(1));
        let mut tracker = monitored(c);
        tracker.ranging.insert(c);
        let start = Instant::now();
        tracker.record(Address::new([1; 6]), Ok(Some(reading(1, 1, -59))), start);

        let events = tracker.tick(start + INTERVAL);
        let [RadioEvent::RangeUpdate { observations, .. }] = events.as_slice() else {
            panic!("expected one range update, got {events:?}");
        };
        assert_eq!(observations.len(), 1);

        let events = tracker.tick(start + EXIT);
        assert!(matches!(
            events[0],
            RadioEvent::RegionStateChanged {
                state: RegionState::Outside,
                ..
            }
        ));
        let RadioEvent::RangeUpdate { observations, .. } = &events[1] else {
            panic!("expected a range update after the exit");
        };
        assert!(observations.is_empty());
    }
}
