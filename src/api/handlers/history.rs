//! Cross-unit history and statistics

use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;

use super::{clamp_limit, ApiState};
use crate::api::envelope::{store_error, ApiErrorResponse, ApiResponse};
use crate::config::defaults::{HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT, STATS_DEFAULT_DAYS};
use crate::storage::history::{self, HistoryFilter};

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub unit_id: Option<String>,
    pub limit: Option<usize>,
    pub days: Option<i64>,
}

/// GET /api/v1/history?unit_id=&limit=&days=
pub async fn get_history(State(state): State<ApiState>, Query(params): Query<HistoryParams>) -> Response {
    if params.days.is_some_and(|d| d < 1) {
        return ApiErrorResponse::bad_request("days must be at least 1");
    }
    let filter = HistoryFilter {
        unit_id: params.unit_id.filter(|u| !u.trim().is_empty()),
        days: params.days,
        limit: clamp_limit(params.limit, HISTORY_DEFAULT_LIMIT, HISTORY_MAX_LIMIT),
    };
    match history::query(state.stores.events.as_ref(), &filter, Utc::now()) {
        Ok(page) => ApiResponse::ok(page),
        Err(e) => store_error(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub days: Option<i64>,
    pub unit_id: Option<String>,
}

/// GET /api/v1/history/stats?days=30&unit_id=
pub async fn get_history_stats(State(state): State<ApiState>, Query(params): Query<StatsParams>) -> Response {
    let days = params.days.unwrap_or(STATS_DEFAULT_DAYS);
    if days < 1 {
        return ApiErrorResponse::bad_request("days must be at least 1");
    }
    let unit_id = params.unit_id.as_deref().filter(|u| !u.trim().is_empty());
    match history::stats(state.stores.events.as_ref(), days, unit_id, state.scan_limit, Utc::now()) {
        Ok(stats) => ApiResponse::ok(stats),
        Err(e) => store_error(&e),
    }
}
