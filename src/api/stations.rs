use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{AppState, ApiError};
use crate::catalog::{CatalogError, Rank};

#[derive(Debug, Deserialize, IntoParams)]
pub struct StationsQuery {
    /// External line id to list stations for, in line order.
    pub line: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StationSummary {
    pub id: String,
    pub name_ja: String,
    pub name_en: String,
    pub lon: f64,
    pub lat: f64,
    pub rank: Option<Rank>,
    pub dwell_time: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StationListResponse {
    pub stations: Vec<StationSummary>,
}

/// Ordered station list, with coordinates, for one line (§6).
#[utoipa::path(
    get,
    path = "/stations",
    params(StationsQuery),
    responses(
        (status = 200, description = "Stations on the line, in line order", body = StationListResponse),
        (status = 404, description = "Unknown line", body = super::ErrorResponse),
    ),
    tag = "stations",
)]
pub async fn list_stations(
    State(state): State<AppState>,
    Query(query): Query<StationsQuery>,
) -> Result<Json<StationListResponse>, ApiError> {
    let line_id = state
        .catalog
        .line_id_by_external(&query.line)
        .ok_or_else(|| ApiError::Catalog(CatalogError::LineUnknown { line_id: query.line.clone() }))?;
    let line = state.catalog.line(line_id);

    let stations = line
        .station_order
        .iter()
        .map(|&station_id| {
            let station = state.catalog.station(station_id);
            StationSummary {
                id: station.external_id.clone(),
                name_ja: station.name_ja.clone(),
                name_en: station.name_en.clone(),
                lon: station.lon,
                lat: station.lat,
                rank: station.rank(),
                dwell_time: station.dwell_time(),
            }
        })
        .collect();

    Ok(Json(StationListResponse { stations }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PatchStationRankRequest {
    pub rank: Rank,
    pub dwell_time: u32,
}

/// Admin write: set a station's display rank and dwell time (§5 Admin
/// writer; serialized, rare, never contends with query handlers).
#[utoipa::path(
    put,
    path = "/stations/{id}/rank",
    params(("id" = String, Path, description = "External station id")),
    request_body = PatchStationRankRequest,
    responses(
        (status = 204, description = "Rank updated"),
        (status = 404, description = "Unknown station", body = super::ErrorResponse),
    ),
    tag = "stations",
)]
pub async fn patch_station_rank(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PatchStationRankRequest>,
) -> Result<StatusCode, ApiError> {
    state.catalog.patch_station_rank(&id, body.rank, body.dwell_time)?;
    Ok(StatusCode::NO_CONTENT)
}
