//! HTTP surface (§6): one axum `Router` per resource, nested under a single
//! shared `AppState`, documented through `utoipa`.

pub mod error;
pub mod health;
pub mod lines;
pub mod positions;
pub mod shape;
pub mod stations;

use std::sync::Arc;

use axum::routing::{get, put};
use axum::Router;

pub use error::{ApiError, ErrorResponse};

use crate::catalog::Catalog;
use crate::fusion::FusionPublisher;
use crate::segment::SegmentIndex;
use crate::timetable::Timetable;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub timetable: Arc<Timetable>,
    pub segment_index: Arc<SegmentIndex>,
    pub publisher: Arc<FusionPublisher>,
    pub tz: chrono_tz::Tz,
    pub holidays: Arc<Vec<chrono::NaiveDate>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/positions", get(positions::get_positions))
        .route("/lines", get(lines::list_lines))
        .route("/stations", get(stations::list_stations))
        .route("/stations/{id}/rank", put(stations::patch_station_rank))
        .route("/shape", get(shape::get_shape))
        .route("/health", get(health::health_check))
        .with_state(state)
}
