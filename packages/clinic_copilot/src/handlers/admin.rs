//! Admin endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::db::DbStats;

pub async fn database_stats_handler(
    State(state): State<AppState>,
) -> Result<Json<DbStats>, (StatusCode, String)> {
    state.db.get_stats().await.map(Json).map_err(|e| {
        tracing::error!("Failed to get database stats: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to get database stats: {}", e),
        )
    })
}
