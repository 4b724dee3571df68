//! Classification feedback capture. Stored for review, never applied.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{clamp_limit, ApiState};
use crate::api::envelope::{store_error, ApiErrorResponse, ApiResponse};
use crate::config::defaults::{HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT};
use crate::storage::{FeedbackRecord, FeedbackSubmission};

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackAccepted {
    pub feedback_id: String,
    pub message: String,
}

/// POST /api/v1/feedback
pub async fn submit_feedback(State(state): State<ApiState>, Json(submission): Json<FeedbackSubmission>) -> Response {
    if submission.unit_id.trim().is_empty() {
        return ApiErrorResponse::bad_request("unit_id is required");
    }
    if submission.confidence.is_some_and(|c| !(0.0..=1.0).contains(&c)) {
        return ApiErrorResponse::bad_request("confidence must be within [0, 1]");
    }

    let record = FeedbackRecord::from_submission(submission, Utc::now());
    match state.stores.feedback.submit(&record) {
        Ok(()) => {
            tracing::info!(
                feedback_id = %record.feedback_id,
                unit = %record.unit_id,
                is_correct = record.is_correct,
                "Feedback recorded"
            );
            ApiResponse::with_status(
                StatusCode::CREATED,
                FeedbackAccepted {
                    feedback_id: record.feedback_id,
                    message: "Feedback recorded".to_string(),
                },
            )
        }
        Err(e) => store_error(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedbackParams {
    pub unit_id: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/v1/feedback?unit_id=&limit=
pub async fn list_feedback(State(state): State<ApiState>, Query(params): Query<FeedbackParams>) -> Response {
    let limit = clamp_limit(params.limit, HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT);
    match state.stores.feedback.list(params.unit_id.as_deref(), limit) {
        Ok(records) => ApiResponse::ok(records),
        Err(e) => store_error(&e),
    }
}
