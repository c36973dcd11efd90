//! HTTP surface over the query service.

use super::error::ApiError;
use crate::application::query::QueryService;
use crate::domain::types::{AggregatedData, Mode, SystemStatus, TimeRange};
use crate::domain::window::WindowGrid;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const DEFAULT_HISTORY_MS: i64 = 60 * 60 * 1000;

pub fn create_router(query: QueryService) -> Router {
    Router::new()
        .route("/prices/latest/{exchange}/{pair}", get(get_latest))
        .route("/prices/history/{exchange}/{pair}", get(get_history))
        .route("/health", get(get_health))
        .route("/mode/{mode}", post(set_mode))
        .with_state(query)
}

/// Unix millisecond bounds; both optional.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl HistoryParams {
    /// Missing `to` means now; missing `from` means one hour before `to`.
    pub fn resolve(&self) -> TimeRange {
        let to = self
            .to
            .map(WindowGrid::to_datetime)
            .unwrap_or_else(Utc::now);
        let from = self
            .from
            .map(WindowGrid::to_datetime)
            .unwrap_or(to - Duration::milliseconds(DEFAULT_HISTORY_MS));
        TimeRange::new(from, to)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModeResponse {
    pub mode: Mode,
}

pub async fn get_latest(
    State(query): State<QueryService>,
    Path((exchange, pair)): Path<(String, String)>,
) -> Result<Json<AggregatedData>, ApiError> {
    let latest = query.get_latest(&exchange, &pair.to_uppercase()).await?;
    Ok(Json(latest))
}

pub async fn get_history(
    State(query): State<QueryService>,
    Path((exchange, pair)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<AggregatedData>>, ApiError> {
    let rows = query
        .get_history(&exchange, &pair.to_uppercase(), params.resolve())
        .await?;
    Ok(Json(rows))
}

pub async fn get_health(State(query): State<QueryService>) -> Json<SystemStatus> {
    Json(query.get_status().await)
}

pub async fn set_mode(
    State(query): State<QueryService>,
    Path(mode): Path<String>,
) -> Result<Json<ModeResponse>, ApiError> {
    let mode = Mode::from_str(&mode)?;
    let mode = query.set_mode(mode).await?;
    Ok(Json(ModeResponse { mode }))
}
