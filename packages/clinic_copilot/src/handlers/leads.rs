//! Dashboard read and update endpoints for leads and conversations.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use crate::AppState;
use crate::models::{ConversationMessage, Lead, LeadStatus, Temperature};

#[derive(Debug, Deserialize)]
pub struct LeadsQuery {
    pub tenant_id: String,
}

pub async fn list_leads_handler(
    State(state): State<AppState>,
    Query(query): Query<LeadsQuery>,
) -> Result<Json<Vec<Lead>>, (StatusCode, String)> {
    state
        .repository
        .list_leads(&query.tenant_id)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to list leads: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list leads".to_string(),
            )
        })
}

pub async fn lead_messages_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ConversationMessage>>, (StatusCode, String)> {
    let lead = state.repository.get_lead(&id).await.map_err(|e| {
        tracing::error!("Failed to load lead: {:#}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to load lead".to_string(),
        )
    })?;
    if lead.is_none() {
        return Err((StatusCode::NOT_FOUND, format!("Lead not found: {id}")));
    }

    state
        .repository
        .list_messages(&id)
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to list messages: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to list messages".to_string(),
            )
        })
}

#[derive(Debug, Deserialize)]
pub struct UpdateLeadRequest {
    #[serde(default)]
    pub status: Option<LeadStatus>,
    #[serde(default)]
    pub temperature: Option<Temperature>,
}

pub async fn update_lead_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateLeadRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    if request.status.is_none() && request.temperature.is_none() {
        return Err((StatusCode::BAD_REQUEST, "Nothing to update".to_string()));
    }

    let updated = state
        .repository
        .update_lead_pipeline(&id, request.status, request.temperature)
        .await
        .map_err(|e| {
            tracing::error!("Failed to update lead: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update lead".to_string(),
            )
        })?;

    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("Lead not found: {id}")))
    }
}
