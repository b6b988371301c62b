//! # beaconkit-core
//!
//! Core engine for the beaconkit beacon proximity system.
//!
//! This crate provides:
//! - Region monitoring and ranging lifecycle per identity constraint
//! - Proximity aggregation of ranging batches into distance buckets
//! - Identity broadcast that follows radio power transitions
//! - Configuration management (beacon identity, radio tuning, watch list)
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`engine`] - The [`ProximityEngine`] facade owning one session of components
//! - [`watcher`] - Per-constraint monitoring and ranging state machine
//! - [`aggregator`] - Bucketed proximity view rebuilt on every range update
//! - [`advertiser`] - Broadcast of this device's beacon identity
//! - [`radio`] - The radio stack seam, iBeacon frames and radio backends
//! - [`runtime`] - Tokio task hosting an engine behind a message queue
//! - [`config`] - Application configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared domain types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod advertiser;
pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod radio;
pub mod runtime;
pub mod types;
pub mod watcher;

// Re-export primary types for convenience
pub use advertiser::{AdvertiserError, BeaconAdvertiser};
pub use aggregator::{ProximityAggregator, ProximityView};
pub use config::{
    default_config_path, is_valid_broadcast_domain, BeaconConfig, Config, ConfigError,
    ConfigResult, RadioConfig, ServerConfig, DEFAULT_NAMESPACE_ID,
};
pub use engine::{EngineFault, EngineNotice, EngineStatus, ProximityEngine};
pub use error::{BeaconError, Result};
#[cfg(feature = "bluetooth")]
pub use radio::bluez::BluezRadio;
pub use radio::ibeacon::{IBeaconFrame, PayloadError};
#[cfg(any(feature = "mock-radio", not(feature = "bluetooth")))]
pub use radio::mock::MockRadio;
pub use radio::{AdvertisementPayload, RadioCommand, RadioEvent, RadioEventHandler, RadioStack};
pub use runtime::{spawn_engine, EngineHandle, RadioEventSink};
pub use types::{
    Authorization, BeaconIdentity, BeaconRegion, ConstraintFields, IdentityConstraint,
    Observation, PowerState, ProximityBucket, RegionState,
};
pub use watcher::{RangingActiveChanged, RegionWatcher, WatchOutcome, WatchState, WatchStatus};
