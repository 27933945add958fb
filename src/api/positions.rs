use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use utoipa::IntoParams;

use super::{AppState, ApiError};
use crate::position::{self, PositionsResponse};

#[derive(Debug, Deserialize, IntoParams)]
pub struct PositionsQuery {
    /// External line id, e.g. "jy" (Yamanote Line).
    pub line: String,
    /// ISO-8601 instant to query at; defaults to the server's current time.
    pub at: Option<chrono::DateTime<Utc>>,
}

/// Enumerate every train currently running on a line, projected onto its
/// geometry (§4.5, §6).
#[utoipa::path(
    get,
    path = "/positions",
    params(PositionsQuery),
    responses(
        (status = 200, description = "Positions for every active train on the line", body = PositionsResponse),
        (status = 404, description = "Unknown line", body = super::ErrorResponse),
    ),
    tag = "positions",
)]
pub async fn get_positions(
    State(state): State<AppState>,
    Query(query): Query<PositionsQuery>,
) -> Result<Json<PositionsResponse>, ApiError> {
    let at = query.at.unwrap_or_else(Utc::now);
    let response = position::positions(
        &state.catalog,
        &state.timetable,
        &state.segment_index,
        &state.publisher,
        state.tz,
        &state.holidays,
        &query.line,
        at,
        None,
    )?;
    Ok(Json(response))
}
