//! Proximity view API endpoint.
//!
//! Serves the engine's bucketed view of every transmitter currently in range
//! of a ranged constraint.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use beaconkit_core::{Observation, ProximityBucket, ProximityView};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// One transmitter seen in the last ranging batch of a constraint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "region": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0",
    "uuid": "e2c56db5-dffb-48d2-b060-d0f5a71096e0",
    "major": 100,
    "minor": 7,
    "rssi_dbm": -71,
    "age_ms": 420
}))]
pub struct ObservationResponse {
    /// Region identifier of the constraint whose ranging produced this entry.
    #[schema(example = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0")]
    pub region: String,

    /// Transmitter namespace UUID.
    pub uuid: Uuid,

    /// Transmitter major.
    #[schema(example = 100)]
    pub major: u16,

    /// Transmitter minor.
    #[schema(example = 7)]
    pub minor: u16,

    /// Signal strength in dBm, if the radio reported one.
    #[schema(example = -71)]
    pub rssi_dbm: Option<i16>,

    /// Milliseconds since the reading was taken.
    #[schema(example = 420)]
    pub age_ms: u64,
}

impl ObservationResponse {
    fn from_observation(obs: &Observation, now: Instant) -> Self {
        Self {
            region: obs.constraint.region_identifier(),
            uuid: obs.constraint.uuid(),
            major: obs.major,
            minor: obs.minor,
            rssi_dbm: obs.rssi,
            age_ms: u64::try_from(now.saturating_duration_since(obs.observed_at).as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

/// All observations in one distance bucket.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BucketResponse {
    /// Distance bucket.
    pub proximity: ProximityBucket,

    /// Observations in the bucket. Never empty.
    pub observations: Vec<ObservationResponse>,
}

/// Proximity view response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "buckets": [
        {
            "proximity": "far",
            "observations": [{
                "region": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0",
                "uuid": "e2c56db5-dffb-48d2-b060-d0f5a71096e0",
                "major": 100,
                "minor": 7,
                "rssi_dbm": -71,
                "age_ms": 420
            }]
        }
    ],
    "total": 1,
    "generated_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct ProximityResponse {
    /// Non-empty buckets in `unknown, immediate, near, far` order.
    pub buckets: Vec<BucketResponse>,

    /// Number of observations across all buckets.
    #[schema(example = 1)]
    pub total: usize,

    /// UTC timestamp of when this view was read.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub generated_at_utc: String,
}

impl ProximityResponse {
    fn from_view(view: &ProximityView) -> Self {
        let now = Instant::now();
        let buckets: Vec<BucketResponse> = view
            .iter()
            .map(|(proximity, observations)| BucketResponse {
                proximity: *proximity,
                observations: observations
                    .iter()
                    .map(|o| ObservationResponse::from_observation(o, now))
                    .collect(),
            })
            .collect();
        let total = buckets.iter().map(|b| b.observations.len()).sum();

        Self {
            buckets,
            total,
            generated_at_utc: Utc::now().to_rfc3339(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the current proximity view.
#[utoipa::path(
    get,
    path = "/api/proximity",
    tag = "proximity",
    operation_id = "getProximityView",
    summary = "Get the bucketed proximity view",
    description = "Returns every transmitter from the latest ranging batch of each \
        ranged region, grouped by distance bucket. Empty buckets are omitted. A \
        transmitter matched by two overlapping regions appears once per region.",
    responses(
        (status = 200, description = "Current view", body = ProximityResponse),
        (status = 503, description = "Engine has shut down")
    )
)]
pub async fn get_proximity(State(state): State<SharedState>) -> ApiResult<Json<ProximityResponse>> {
    let engine = state.read().await.engine.clone();
    let view = engine.proximity_view().await?;
    Ok(Json(ProximityResponse::from_view(&view)))
}
