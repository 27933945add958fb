use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct LineSummary {
    pub id: String,
    pub name_ja: String,
    pub name_en: String,
    pub color: String,
    pub closed_loop: bool,
    pub station_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LineListResponse {
    pub lines: Vec<LineSummary>,
}

/// List every line in the static catalog (§6).
#[utoipa::path(
    get,
    path = "/lines",
    responses((status = 200, description = "All configured lines", body = LineListResponse)),
    tag = "lines",
)]
pub async fn list_lines(State(state): State<AppState>) -> Json<LineListResponse> {
    let lines = state
        .catalog
        .lines
        .iter()
        .map(|line| LineSummary {
            id: line.external_id.clone(),
            name_ja: line.name_ja.clone(),
            name_en: line.name_en.clone(),
            color: line.color.clone(),
            closed_loop: line.closed_loop,
            station_count: line.station_order.len(),
        })
        .collect();
    Json(LineListResponse { lines })
}
