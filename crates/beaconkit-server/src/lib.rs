//! # beaconkit-server
//!
//! HTTP server library for the beaconkit beacon proximity system.
//!
//! This library provides the API handlers, state management and logging
//! setup used by the `beaconkit-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
