//! HTTP API routes and handlers.
//!
//! - `health` - Service health checks
//! - `sessions` - Acquisition session status, manual start and cancel
//! - `credential` - The persisted credential (never its passphrase)
//! - `error` - API error types
//! - `openapi` - OpenAPI specification

use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod credential;
pub mod error;
pub mod health;
pub mod openapi;
pub mod sessions;

pub use error::{ApiError, ApiResult, ErrorResponse};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                     - Health check
/// /api
/// ├── /sessions               - List (GET) or start (POST) sessions
/// ├── /sessions/{address}     - Get (GET) or cancel (DELETE) one session
/// ├── /credential             - Persisted network name
/// ├── /credential/apply       - Re-apply the persisted credential
/// └── /openapi.json           - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(sessions::router())
        .merge(credential::router())
        .route("/api/openapi.json", get(openapi::get_openapi_spec))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
