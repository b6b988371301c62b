//! Region watch API endpoints.
//!
//! Provides endpoints for adding a watched constraint and clearing the watch
//! list.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use beaconkit_core::{ConstraintFields, IdentityConstraint, WatchOutcome};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the watch router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(watch_region).delete(unwatch_all))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// What happened to a watch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WatchResult {
    /// Monitoring started.
    Monitoring,
    /// Registered; monitoring starts when the radio powers on.
    Deferred,
    /// Registered, but authorization is refused.
    Denied,
    /// The region was already watched.
    AlreadyWatched,
}

impl From<WatchOutcome> for WatchResult {
    fn from(outcome: WatchOutcome) -> Self {
        match outcome {
            WatchOutcome::Monitoring => Self::Monitoring,
            WatchOutcome::Deferred => Self::Deferred,
            WatchOutcome::Denied => Self::Denied,
            WatchOutcome::AlreadyWatched => Self::AlreadyWatched,
        }
    }
}

/// Watch response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "region": "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0:100",
    "result": "monitoring"
}))]
pub struct WatchResponse {
    /// Region identifier of the watched constraint.
    #[schema(example = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0:100")]
    pub region: String,

    /// Outcome of the request.
    pub result: WatchResult,
}

/// Unwatch-all response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "unwatched": 2 }))]
pub struct UnwatchAllResponse {
    /// Number of regions that were being watched.
    #[schema(example = 2)]
    pub unwatched: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Watch a region.
#[utoipa::path(
    post,
    path = "/api/watch",
    tag = "watch",
    operation_id = "watchRegion",
    summary = "Watch a beacon region",
    description = "Starts monitoring the region described by the constraint. Leave \
        `major` out to match every major, and `minor` out to match every minor; \
        `minor` requires `major`. Watching an already-watched region changes \
        nothing. Ranging starts automatically when the device enters the region.",
    request_body = ConstraintFields,
    responses(
        (status = 200, description = "Watch request processed", body = WatchResponse),
        (status = 400, description = "Invalid constraint"),
        (status = 409, description = "Engine not configured"),
        (status = 503, description = "Engine has shut down")
    )
)]
pub async fn watch_region(
    State(state): State<SharedState>,
    Json(request): Json<ConstraintFields>,
) -> ApiResult<Json<WatchResponse>> {
    let constraint =
        IdentityConstraint::try_from(request).map_err(|message| ApiError::BadRequest {
            error_code: "INVALID_CONSTRAINT".to_string(),
            message,
        })?;

    let engine = state.read().await.engine.clone();
    let outcome = engine.watch(constraint).await?;
    state.write().await.remember_watch(constraint);

    info!(region = %constraint, ?outcome, "Watch requested via API");
    Ok(Json(WatchResponse {
        region: constraint.region_identifier(),
        result: outcome.into(),
    }))
}

/// Stop watching every region.
#[utoipa::path(
    delete,
    path = "/api/watch",
    tag = "watch",
    operation_id = "unwatchAll",
    summary = "Stop watching all regions",
    description = "Stops ranging and monitoring for every watched region and clears \
        the watch list. The proximity view becomes empty. Safe to call repeatedly.",
    responses(
        (status = 200, description = "Watch list cleared", body = UnwatchAllResponse),
        (status = 503, description = "Engine has shut down")
    )
)]
pub async fn unwatch_all(State(state): State<SharedState>) -> ApiResult<Json<UnwatchAllResponse>> {
    let engine = state.read().await.engine.clone();
    let unwatched = engine.status().await?.watching.len();
    engine.unwatch_all().await?;
    state.write().await.config.watch.clear();

    info!(unwatched, "All regions unwatched via API");
    Ok(Json(UnwatchAllResponse { unwatched }))
}
