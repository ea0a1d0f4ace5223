//! Health check endpoint
//!
//! Reports whether the proxy can currently serve traffic, which means
//! at least one key in the active pool is eligible for selection.

use axum::{extract::State, http::StatusCode};

use crate::server::state::AppState;

/// Service health, driven by key pool eligibility
///
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.key_pool.has_available() {
        (StatusCode::OK, "Service is healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service is unhealthy")
    }
}
