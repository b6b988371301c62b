//! Engine status API endpoint.
//!
//! Reports the degraded states the engine never raises as errors: radio power,
//! broadcast state and per-region authorization.

use axum::extract::State;
use axum::Json;
use beaconkit_core::{BeaconIdentity, EngineStatus, PowerState, WatchState, WatchStatus};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Identity this device broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IdentityResponse {
    /// Namespace UUID.
    pub uuid: Uuid,

    /// Major value.
    #[schema(example = 100)]
    pub major: u16,

    /// Minor value.
    #[schema(example = 50)]
    pub minor: u16,
}

impl From<BeaconIdentity> for IdentityResponse {
    fn from(id: BeaconIdentity) -> Self {
        Self {
            uuid: id.uuid,
            major: id.major,
            minor: id.minor,
        }
    }
}

/// One watched region.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WatchedRegionResponse {
    /// Region identifier, `UUID[:major[:minor]]`.
    #[schema(example = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0:100")]
    pub region: String,

    /// Lifecycle state.
    pub state: WatchState,

    /// Whether authorization permits monitoring this region.
    #[schema(example = true)]
    pub authorized: bool,
}

impl From<WatchStatus> for WatchedRegionResponse {
    fn from(status: WatchStatus) -> Self {
        Self {
            region: status.constraint.region_identifier(),
            state: status.state,
            authorized: status.authorized,
        }
    }
}

/// Engine status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "version": "0.1.0",
    "uptime_secs": 3600,
    "configured": true,
    "power_state": "powered_on",
    "advertising": true,
    "identity": {
        "uuid": "e2c56db5-dffb-48d2-b060-d0f5a71096e0",
        "major": 100,
        "minor": 50
    },
    "watching": [{
        "region": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0:100",
        "state": "ranging_active",
        "authorized": true
    }]
}))]
pub struct StatusResponse {
    /// Server version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Server uptime in seconds.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// Whether the engine is configured.
    #[schema(example = true)]
    pub configured: bool,

    /// Last power state reported by the radio.
    pub power_state: PowerState,

    /// Whether this device is broadcasting its identity.
    #[schema(example = true)]
    pub advertising: bool,

    /// Broadcast identity, once configured.
    #[schema(nullable)]
    pub identity: Option<IdentityResponse>,

    /// Every watched region.
    pub watching: Vec<WatchedRegionResponse>,
}

impl StatusResponse {
    fn new(status: EngineStatus, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            configured: status.configured,
            power_state: status.power_state,
            advertising: status.advertising,
            identity: status.identity.map(IdentityResponse::from),
            watching: status
                .watching
                .into_iter()
                .map(WatchedRegionResponse::from)
                .collect(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get engine status.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "system",
    operation_id = "getStatus",
    summary = "Get engine status",
    description = "Returns the radio power state, whether the identity broadcast is \
        running, and the lifecycle state of every watched region. Degraded \
        states such as a powered-off radio or refused authorization show up \
        here rather than as errors.",
    responses(
        (status = 200, description = "Status retrieved", body = StatusResponse),
        (status = 503, description = "Engine has shut down")
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> ApiResult<Json<StatusResponse>> {
    let (engine, uptime_secs) = {
        let guard = state.read().await;
        (guard.engine.clone(), guard.uptime_secs())
    };
    let status = engine.status().await?;
    Ok(Json(StatusResponse::new(status, uptime_secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use beaconkit_core::IdentityConstraint;

    #[test]
    fn test_status_response_serialization() {
        let c = IdentityConstraint::with_major(Uuid::from_u128(1), 100);
        let status = EngineStatus {
            configured: true,
            power_state: PowerState::PoweredOn,
            advertising: true,
            identity: None,
            watching: vec![WatchStatus {
                constraint: c,
                state: WatchState::RangingActive,
                authorized: true,
            }],
        };

        let json = serde_json::to_string(&StatusResponse::new(status, 5)).unwrap();

        assert!(json.contains("\"power_state\":\"powered_on\""));
        assert!(json.contains("\"state\":\"ranging_active\""));
        assert!(json.contains(&format!("\"region\":\"{}\"", c.region_identifier())));
    }
}
