//! OpenAPI specification generation for the beaconkit API.
//!
//! The document is served next to the Swagger UI at `/api/openapi.json` and
//! written to disk by the `gen-openapi` binary for client generation.

use utoipa::OpenApi;

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::proximity::{BucketResponse, ObservationResponse, ProximityResponse};
use super::status::{IdentityResponse, StatusResponse, WatchedRegionResponse};
use super::watch::{UnwatchAllResponse, WatchResponse, WatchResult};
use beaconkit_core::{ConstraintFields, PowerState, ProximityBucket, WatchState};

/// Returns the OpenAPI specification as a string (for writing to file).
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for beaconkit.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "beaconkit API",
        version = "0.1.0",
        description = r#"
# beaconkit API

beaconkit watches beacon regions, ranges the transmitters inside them, and
broadcasts this device's own beacon identity.

## Overview

1. **Watch**: Register an identity constraint (`uuid`, optional `major`, optional
   `minor`). The radio monitors the region and starts ranging on entry.
2. **Proximity**: Read the latest ranging results grouped into `unknown`,
   `immediate`, `near` and `far` buckets. Empty buckets are omitted.
3. **Status**: See radio power, broadcast state and per-region authorization.

## Behavior

- Ranging stops, and its entries leave the view, when the device exits a region.
- Each ranging batch replaces the previous batch for the same region.
- The broadcast restarts on every radio power-on.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local beaconkit server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks and engine status"
        ),
        (
            name = "proximity",
            description = "Bucketed proximity view of ranged transmitters"
        ),
        (
            name = "watch",
            description = "Region watch list management"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Proximity endpoints
        super::proximity::get_proximity,
        // Status endpoints
        super::status::get_status,
        // Watch endpoints
        super::watch::watch_region,
        super::watch::unwatch_all,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Proximity types
            ProximityBucket,
            ObservationResponse,
            BucketResponse,
            ProximityResponse,
            // Status types
            PowerState,
            WatchState,
            IdentityResponse,
            WatchedRegionResponse,
            StatusResponse,
            // Watch types
            ConstraintFields,
            WatchResult,
            WatchResponse,
            UnwatchAllResponse,
        )
    )
)]
pub struct ApiDoc;
