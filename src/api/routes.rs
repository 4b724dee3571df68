//! API route definitions
//!
//! - `/api/v1/units`, `/api/v1/units/:unit_id`, `/api/v1/units/:unit_id/history`
//! - `/api/v1/history`, `/api/v1/history/stats`
//! - `/api/v1/feedback` (GET, POST)
//! - `/api/v1/ingest/:unit_id` (POST)
//! - `/api/v1/upload/image` (POST)
//! - `/api/v1/status`, `/api/v1/system/health`, `/api/v1/metrics`
//! - `/health` liveness at the root

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/units", get(handlers::list_units))
        .route("/units/:unit_id", get(handlers::get_unit))
        .route("/units/:unit_id/history", get(handlers::get_unit_history))
        .route("/history", get(handlers::get_history))
        .route("/history/stats", get(handlers::get_history_stats))
        .route("/feedback", get(handlers::list_feedback).post(handlers::submit_feedback))
        .route("/ingest/:unit_id", post(handlers::ingest_reading))
        .route("/upload/image", post(handlers::upload_image))
        .route("/status", get(handlers::get_status))
        .route("/system/health", get(handlers::get_system_health))
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state)
}

pub fn root_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::liveness))
        .with_state(state)
}
