//! Router configuration for the HTTP API.

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use super::handlers;
use super::AppState;

/// Create the API router with all routes and the CORS policy.
pub fn create_router(state: AppState, allowed_origins: &str) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/mailboxes", get(handlers::list_mailboxes))
        .route("/api/mailboxes/export", get(handlers::export_mailboxes))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/stats/refresh", post(handlers::refresh_stats))
        .route("/api/crawl/run", post(handlers::start_crawl))
        .route("/api/crawl/ipost1/run", post(handlers::start_ipost1_crawl))
        .route("/api/crawl/reprocess", post(handlers::start_reprocess))
        .route("/api/crawl/status", get(handlers::crawl_status))
        .route("/api/crawl/runs", get(handlers::list_crawl_runs))
        .route("/api/crawl/cancel", post(handlers::cancel_crawl))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let origins: Vec<&str> = allowed_origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    if origins.is_empty() || origins.contains(&"*") {
        layer.allow_origin(Any)
    } else {
        let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(AllowOrigin::list(list))
    }
}
