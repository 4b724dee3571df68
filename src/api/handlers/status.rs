//! Service status, health and metrics

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt::Write as _;

use super::ApiState;
use crate::api::envelope::ApiResponse;
use crate::background::HealthStatus;
use crate::pipeline::StatsSnapshot;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub pipeline: StatsSnapshot,
    pub store_backend: &'static str,
    /// `None` when the store could not be read
    pub record_count: Option<usize>,
    pub dead_letter_pending: Option<usize>,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(build_status(&state))
}

fn build_status(state: &ApiState) -> StatusResponse {
    let events = &state.stores.events;
    StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        pipeline: state.stats.snapshot(),
        store_backend: events.backend_name(),
        record_count: events.record_count().ok(),
        dead_letter_pending: state.dead_letters.as_ref().and_then(|q| q.pending_count().ok()),
    }
}

/// GET /api/v1/system/health
///
/// Latest health monitor cycle; 503 while any component is unhealthy.
pub async fn get_system_health(State(state): State<ApiState>) -> Response {
    let health = state.health.read().await.clone();
    let status = match health.overall {
        HealthStatus::Unhealthy { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    ApiResponse::with_status(status, health)
}

#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
}

/// GET /health
///
/// Liveness only: answers as long as the process serves HTTP.
pub async fn liveness(State(state): State<ApiState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        uptime_secs: state.stats.uptime_secs(),
    })
}

/// GET /api/v1/metrics
///
/// Pipeline counters in Prometheus text format (version 0.0.4).
pub async fn get_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let status = build_status(&state);
    let p = &status.pipeline;

    let counters = [
        ("sentinel_messages_received_total", "Messages taken from any source", p.received),
        ("sentinel_messages_malformed_total", "Messages rejected by the decoder", p.malformed),
        ("sentinel_records_rejected_total", "Decoded readings refused at assembly", p.rejected),
        ("sentinel_records_persisted_total", "Records appended to the event log", p.persisted),
        ("sentinel_escalations_total", "Readings escalated to the secondary model", p.escalated),
        ("sentinel_secondary_failures_total", "Secondary calls that failed or timed out", p.secondary_failures),
        ("sentinel_archive_failures_total", "Artifact archival failures", p.archive_failures),
        ("sentinel_dead_lettered_total", "Records handed to the dead-letter queue", p.dead_lettered),
    ];

    let mut body = String::with_capacity(2048);
    for (name, help, value) in counters {
        let _ = writeln!(body, "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}");
    }
    let _ = writeln!(
        body,
        "# HELP sentinel_uptime_seconds Process uptime in seconds\n# TYPE sentinel_uptime_seconds gauge\nsentinel_uptime_seconds {}",
        p.uptime_secs
    );
    if let Some(count) = status.record_count {
        let _ = writeln!(
            body,
            "# HELP sentinel_store_records Records in the event log\n# TYPE sentinel_store_records gauge\nsentinel_store_records {count}"
        );
    }
    if let Some(pending) = status.dead_letter_pending {
        let _ = writeln!(
            body,
            "# HELP sentinel_dead_letter_pending Records awaiting re-append\n# TYPE sentinel_dead_letter_pending gauge\nsentinel_dead_letter_pending {pending}"
        );
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
