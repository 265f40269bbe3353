use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;

use crate::models::api::{CleanupResponse, ErrorResponse, StatsResponse};
use crate::AppState;

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let sessions = state.sessions.stats();
    Json(StatsResponse {
        total_users: sessions.total,
        registered_users: sessions.registered,
        total_transactions: state.tx_log.total(),
        pending_transactions: state.tx_log.pending(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Sweep stale sessions and expired OTP challenges. Meant to be hit by a
/// scheduler, so it is guarded by the admin token.
pub async fn cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CleanupResponse>, (StatusCode, Json<ErrorResponse>)> {
    let token = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if state.config.admin_token.is_empty() || token != state.config.admin_token {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "unauthorized".to_string(),
            }),
        ));
    }

    let stale_sessions_reset = state.sessions.cleanup_stale();
    let expired_otps_removed = state.otp.cleanup_expired();

    tracing::info!(
        "Cleanup: {} stale sessions reset, {} expired OTPs removed",
        stale_sessions_reset,
        expired_otps_removed
    );

    Ok(Json(CleanupResponse {
        status: "success".to_string(),
        stale_sessions_reset,
        expired_otps_removed,
    }))
}
