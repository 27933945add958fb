//! API error boundary: folds every subsystem's typed error into an HTTP
//! response (§7). Each arm maps to the status code the error table names;
//! everything else at the HTTP boundary is a 500, since it signals a bug
//! rather than an expected runtime condition.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Position(#[from] crate::position::PositionError),

    #[error(transparent)]
    Catalog(#[from] crate::catalog::CatalogError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Position(crate::position::PositionError::LineUnknown { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Position(crate::position::PositionError::Canceled) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            ApiError::Catalog(crate::catalog::CatalogError::StationUnknown { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Catalog(crate::catalog::CatalogError::LineUnknown { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Catalog(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
