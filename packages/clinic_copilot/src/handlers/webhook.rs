//! Gateway-facing webhook endpoint.

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::warn;

use crate::AppState;
use crate::ingest;

/// Ingest sink for gateway events. Replies 200 to everything: a non-2xx
/// here makes the gateway retry and re-deliver, which costs more than any
/// single dropped payload. The body is taken as a raw string so malformed
/// JSON still gets its ack, and processing happens after the ack on a
/// spawned task.
pub async fn evolution_webhook_handler(
    State(state): State<AppState>,
    body: String,
) -> impl IntoResponse {
    state.metrics.webhook_received();

    match ingest::parse_event(&body) {
        Some(event) => {
            let repo = state.repository.clone();
            let metrics = state.metrics.clone();
            tokio::spawn(async move {
                ingest::process_event(&repo, &metrics, event).await;
            });
        }
        None => {
            warn!(
                "unparseable webhook body ({} bytes) acknowledged and dropped",
                body.len()
            );
            state.metrics.event_ignored();
        }
    }

    Json(json!({"status": "received"}))
}
