use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// Liveness/readiness: surfaces the fusion publisher's degraded/healthy
/// state so an external load balancer can observe it (§6, §10).
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Fusion publisher health", body = HealthResponse)),
    tag = "health",
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.publisher.status();
    Json(HealthResponse {
        status: if status.degraded { "degraded".to_string() } else { "healthy".to_string() },
        last_fetch_at: status.last_fetch_at,
        consecutive_failures: status.consecutive_failures,
    })
}
