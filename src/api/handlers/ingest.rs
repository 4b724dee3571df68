//! HTTP ingest bridge onto the in-process message channel.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Serialize;

use super::ApiState;
use crate::acquisition::references_local_file;
use crate::api::envelope::{ApiErrorResponse, ApiResponse};

#[derive(Debug, Serialize)]
pub struct IngestAccepted {
    pub unit_id: String,
    pub status: &'static str,
}

/// POST /api/v1/ingest/:unit_id
///
/// Queues the raw body for the pipeline. Decoding happens asynchronously,
/// so 202 means accepted, not stored. Image fields naming a local file are
/// refused here; only broker and stdin readings may point at the filesystem.
pub async fn ingest_reading(State(state): State<ApiState>, Path(unit_id): Path<String>, body: Bytes) -> Response {
    let unit_id = unit_id.trim().to_string();
    if unit_id.is_empty() || unit_id.contains('/') {
        return ApiErrorResponse::bad_request("unit id must be a single non-empty path segment");
    }
    let Some(sender) = state.ingest.as_ref() else {
        return ApiErrorResponse::service_unavailable("HTTP ingest is not enabled");
    };
    if references_local_file(&body) {
        tracing::warn!(unit = %unit_id, "Ingest rejected: image field names a local path");
        return ApiErrorResponse::bad_request("local image paths are not accepted over HTTP; send image_base64 or an image URL");
    }

    match sender.submit(&unit_id, body.to_vec()) {
        Ok(()) => ApiResponse::with_status(
            StatusCode::ACCEPTED,
            IngestAccepted {
                unit_id,
                status: "queued",
            },
        ),
        Err(e) => {
            tracing::warn!(unit = %unit_id, error = %e, "Ingest rejected");
            ApiErrorResponse::service_unavailable(e.to_string())
        }
    }
}
