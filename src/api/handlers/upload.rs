//! Direct image upload to the configured artifact archiver.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::archiver::ArchiveError;
use crate::types::ImageRef;

#[derive(Debug, Default, Deserialize)]
pub struct ImageUpload {
    #[serde(default)]
    pub panel_id: String,
    #[serde(default)]
    pub image_base64: String,
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageUploaded {
    pub panel_id: String,
    pub image_url: String,
    pub message: String,
}

/// POST /api/v1/upload/image
///
/// Archives an inline image outside the ingest pipeline. Nothing is written
/// to the event log.
pub async fn upload_image(State(state): State<ApiState>, Json(upload): Json<ImageUpload>) -> Response {
    let panel_id = upload.panel_id.trim().to_string();
    let encoded = upload.image_base64.trim();
    if panel_id.is_empty() || encoded.is_empty() {
        return ApiErrorResponse::bad_request("panel_id and image_base64 are required");
    }
    let Some(archiver) = state.archiver.as_ref() else {
        return ApiErrorResponse::service_unavailable("no artifact archiver is configured");
    };

    // Accept both bare base64 and `data:<mime>;base64,<data>` URIs.
    let encoded = match encoded.strip_prefix("data:").and_then(|rest| rest.split_once(',')) {
        Some((_, data)) => data,
        None => encoded,
    };
    let image = ImageRef::Base64(encoded.to_string());

    let outcome = tokio::time::timeout(state.archive_timeout, archiver.archive(&panel_id, Utc::now(), &image))
        .await
        .unwrap_or(Err(ArchiveError::Timeout(state.archive_timeout)));

    match outcome {
        Ok(image_url) => {
            tracing::info!(
                unit = %panel_id,
                backend = archiver.backend(),
                filename = upload.filename.as_deref().unwrap_or("-"),
                url = %image_url,
                "Image uploaded"
            );
            ApiResponse::with_status(
                StatusCode::CREATED,
                ImageUploaded {
                    panel_id,
                    image_url,
                    message: "Image uploaded".to_string(),
                },
            )
        }
        Err(e) => archive_error(&panel_id, &e),
    }
}

fn archive_error(panel_id: &str, e: &ArchiveError) -> Response {
    match e {
        ArchiveError::TooLarge { .. } | ArchiveError::UnsupportedFormat | ArchiveError::InvalidPayload(_) => {
            ApiErrorResponse::bad_request(e.to_string())
        }
        ArchiveError::Timeout(_) => {
            tracing::warn!(unit = %panel_id, error = %e, "Image upload timed out");
            ApiErrorResponse::service_unavailable(e.to_string())
        }
        ArchiveError::Upload(_) | ArchiveError::Io { .. } => {
            tracing::error!(unit = %panel_id, error = %e, "Image upload failed");
            ApiErrorResponse::bad_gateway("content store rejected the image")
        }
    }
}
