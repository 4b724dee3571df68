//! Latest state per unit

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;

use super::{clamp_limit, ApiState};
use crate::api::envelope::{query_error, store_error, ApiErrorResponse, ApiResponse};
use crate::config::defaults::{UNIT_HISTORY_DEFAULT_LIMIT, UNIT_HISTORY_MAX_LIMIT};
use crate::storage::history::{self, HistoryFilter};

/// GET /api/v1/units
///
/// Newest record per unit within the scan window, capture time descending.
pub async fn list_units(State(state): State<ApiState>) -> Response {
    match state.aggregator.unit_summaries() {
        Ok(units) => ApiResponse::ok(units),
        Err(e) => store_error(&e),
    }
}

/// GET /api/v1/units/:unit_id
pub async fn get_unit(State(state): State<ApiState>, Path(unit_id): Path<String>) -> Response {
    match state.aggregator.latest_for_unit(&unit_id) {
        Ok(record) => ApiResponse::ok(record),
        Err(e) => query_error(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UnitHistoryParams {
    pub limit: Option<usize>,
}

/// GET /api/v1/units/:unit_id/history?limit=N
pub async fn get_unit_history(
    State(state): State<ApiState>,
    Path(unit_id): Path<String>,
    Query(params): Query<UnitHistoryParams>,
) -> Response {
    let filter = HistoryFilter {
        unit_id: Some(unit_id.clone()),
        days: None,
        limit: clamp_limit(params.limit, UNIT_HISTORY_DEFAULT_LIMIT, UNIT_HISTORY_MAX_LIMIT),
    };
    match history::query(state.stores.events.as_ref(), &filter, Utc::now()) {
        Ok(page) if page.records.is_empty() => ApiErrorResponse::not_found(format!("no records for unit '{unit_id}'")),
        Ok(page) => ApiResponse::ok(page),
        Err(e) => store_error(&e),
    }
}
