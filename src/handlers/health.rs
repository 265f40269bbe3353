use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::models::api::HealthResponse;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.sessions.stats();
    Json(HealthResponse {
        status: "healthy".to_string(),
        store: "ok".to_string(),
        sessions: stats.total,
        timestamp: Utc::now().to_rfc3339(),
    })
}
