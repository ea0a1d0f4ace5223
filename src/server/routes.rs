//! Application routing
//!
//! `/stats` and `/health` are served locally from registry state;
//! everything else falls through to the proxy handler and is relayed
//! to the upstream verbatim.

use axum::{middleware, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{health, proxy, stats};
use crate::middleware::logging::log_request;
use crate::server::state::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/stats", get(stats::key_stats))
        .route("/health", get(health::health_check))
        .fallback(proxy::proxy_handler)
        .layer(create_cors_layer())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Create CORS layer with permissive settings
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
