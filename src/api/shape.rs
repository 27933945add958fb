use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{AppState, ApiError};
use crate::catalog::CatalogError;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ShapeQuery {
    pub line: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShapeResponse {
    #[serde(rename = "type")]
    pub geometry_type: String,
    pub coordinates: Vec<(f64, f64)>,
}

/// Stitched line geometry as a GeoJSON `LineString` (§6). A line with no
/// usable shape on file (§7 `ShapeInvalid`) returns an empty coordinate
/// list rather than an error — callers fall back to station coordinates.
#[utoipa::path(
    get,
    path = "/shape",
    params(ShapeQuery),
    responses(
        (status = 200, description = "Line geometry", body = ShapeResponse),
        (status = 404, description = "Unknown line", body = super::ErrorResponse),
    ),
    tag = "shape",
)]
pub async fn get_shape(
    State(state): State<AppState>,
    Query(query): Query<ShapeQuery>,
) -> Result<Json<ShapeResponse>, ApiError> {
    let line_id = state
        .catalog
        .line_id_by_external(&query.line)
        .ok_or_else(|| ApiError::Catalog(CatalogError::LineUnknown { line_id: query.line.clone() }))?;
    let line = state.catalog.line(line_id);

    let coordinates = line.shape.as_ref().map(|shape| shape.polyline.clone()).unwrap_or_default();

    Ok(Json(ShapeResponse { geometry_type: "LineString".to_string(), coordinates }))
}
