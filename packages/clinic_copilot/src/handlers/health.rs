//! Health and metrics endpoints.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use crate::AppState;
use crate::metrics::{HealthStatus, InstanceHealth};

pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let (stats, db_ok) = match state.db.get_stats().await {
        Ok(stats) => (stats, true),
        Err(e) => {
            tracing::error!("Failed to read database stats: {:#}", e);
            (Default::default(), false)
        }
    };

    let status = if db_ok && snapshot.errors.persistence == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthStatus {
        status: status.to_string(),
        instances: InstanceHealth {
            total: stats.instances,
            connected: stats.connected_instances,
        },
        uptime_secs: snapshot.uptime_secs,
    })
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness: process is up.
pub async fn health_live_handler() -> impl IntoResponse {
    Json(json!({"status": "alive"}))
}

/// Readiness: database reachable.
pub async fn health_ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.pool.acquire().await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ready"}))),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready"})),
        ),
    }
}
