//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `proximity` - Bucketed proximity view
//! - `status` - Engine, radio and broadcast status
//! - `watch` - Region watch list management
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod error;
pub mod health;
pub mod openapi;
pub mod proximity;
pub mod status;
pub mod watch;

// Re-export commonly used types
pub use error::{ApiError, ApiResult, ErrorResponse};

// Re-export OpenAPI utilities for the gen-openapi binary
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /docs                  - Swagger UI
/// /api
/// ├── /proximity         - Bucketed proximity view
/// ├── /status            - Engine status
/// ├── /watch             - Watch a region (POST) or clear the list (DELETE)
/// └── /openapi.json      - OpenAPI specification (served with the Swagger UI)
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/proximity", get(proximity::get_proximity))
                .route("/status", get(status::get_status))
                .nest("/watch", watch::router()),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api/openapi.json", openapi::ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
