//! REST API (axum)
//!
//! Pull-only read surface over the event log, plus feedback capture and an
//! HTTP ingest bridge. Every `/api/v1` response uses the envelope in
//! [`envelope`]; 503s carry `Retry-After`.

pub mod envelope;
pub mod handlers;
pub mod middleware;
mod routes;

pub use handlers::ApiState;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::middleware as axum_mw;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::defaults::{ARTIFACT_ROUTE, REQUEST_BODY_LIMIT_BYTES};

const CORS_ORIGINS_ENV: &str = "SENTINEL_CORS_ORIGINS";

/// CORS restricted to same-origin unless `SENTINEL_CORS_ORIGINS` lists
/// comma-separated origins.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    match std::env::var(CORS_ORIGINS_ENV) {
        Ok(origins) => {
            let allowed: Vec<_> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Build the complete application router.
pub fn create_app(state: ApiState) -> Router {
    let artifacts_dir = state.artifacts_dir.clone();

    let mut app = Router::new()
        .nest("/api/v1", routes::api_routes(state.clone()))
        .merge(routes::root_routes(state));

    if let Some(dir) = artifacts_dir {
        app = app.nest_service(ARTIFACT_ROUTE, ServeDir::new(dir));
    }

    app.layer(axum_mw::from_fn(middleware::add_retry_after))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(build_cors_layer())
}
