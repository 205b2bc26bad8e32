//! WhatsApp session endpoints for the dashboard.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::models::InstanceStatus;
use crate::provisioning::{ProvisionError, ProvisionOutcome, normalize_outbound_phone};

const GATEWAY_UNCONFIGURED: &str =
    "WhatsApp gateway is not configured; set evolution.base_url and evolution.api_key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectWhatsappRequest {
    pub tenant_id: String,
    pub human_label: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

pub async fn connect_whatsapp_handler(
    State(state): State<AppState>,
    Json(request): Json<ConnectWhatsappRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let Some(provisioner) = state.provisioner.as_ref() else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            GATEWAY_UNCONFIGURED.to_string(),
        ));
    };
    if request.tenant_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "tenantId is required".to_string()));
    }

    state.metrics.provision_request();
    let phone = request
        .phone_number
        .as_deref()
        .filter(|p| !p.trim().is_empty());
    match provisioner
        .provision(&request.tenant_id, &request.human_label, phone)
        .await
    {
        Ok(outcome) => Ok(Json(outcome_response(outcome))),
        Err(ProvisionError::Gateway(e)) => {
            state.metrics.gateway_error();
            tracing::error!("Provisioning failed at gateway: {}", e);
            Err((StatusCode::BAD_GATEWAY, format!("Gateway error: {e}")))
        }
        Err(ProvisionError::Storage(e)) => {
            tracing::error!("Provisioning failed in storage: {:#}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store instance".to_string(),
            ))
        }
    }
}

fn outcome_response(outcome: ProvisionOutcome) -> Value {
    match outcome {
        ProvisionOutcome::AlreadyConnected { instance_name } => json!({
            "instanceName": instance_name,
            "status": "CONNECTED",
        }),
        ProvisionOutcome::PairingCode {
            instance_name,
            code,
        } => json!({
            "instanceName": instance_name,
            "status": "PAIRING",
            "pairingCode": code,
        }),
        ProvisionOutcome::QrCode {
            instance_name,
            qr_base64,
        } => json!({
            "instanceName": instance_name,
            "status": "QRCODE",
            "qrcode": qr_base64,
        }),
    }
}

pub async fn whatsapp_status_handler(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Value>, (StatusCode, String)> {
    // Without gateway credentials the registry view is still served; it is
    // kept current by CONNECTION_UPDATE events.
    let instance = match &state.provisioner {
        Some(provisioner) => provisioner.refresh_status(&tenant_id).await,
        None => state.repository.find_instance_by_tenant(&tenant_id).await,
    }
    .map_err(|e| {
        tracing::error!("Failed to read instance status: {:#}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to read instance status".to_string(),
        )
    })?;

    Ok(Json(match instance {
        Some(instance) => json!({
            "instanceName": instance.instance_name,
            "status": instance.status,
            "connected": instance.status == InstanceStatus::Connected,
        }),
        None => json!({
            "instanceName": null,
            "status": InstanceStatus::Uninitialized,
            "connected": false,
        }),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub instance_name: String,
    /// Dashboard builds have shipped this as `phone`, `recipientPhone` and
    /// `number`; all three deserialize.
    #[serde(alias = "recipientPhone", alias = "number")]
    pub phone: String,
    pub text: String,
}

pub async fn send_message_handler(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let Some(gateway) = state.gateway.as_ref() else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            GATEWAY_UNCONFIGURED.to_string(),
        ));
    };
    if request.text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "text is required".to_string()));
    }
    let number = normalize_outbound_phone(&request.phone);
    if number.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "phone is required".to_string()));
    }

    // Only instances this server provisioned may relay messages.
    let known = state
        .repository
        .find_instance_by_name(&request.instance_name)
        .await
        .map_err(|e| {
            tracing::error!("Failed to resolve instance: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to resolve instance".to_string(),
            )
        })?;
    if known.is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Unknown instance: {}", request.instance_name),
        ));
    }

    match gateway
        .send_text(&request.instance_name, &number, &request.text)
        .await
    {
        Ok(()) => {
            state.metrics.message_sent();
            Ok(Json(json!({"status": "sent", "number": number})))
        }
        Err(e) => {
            state.metrics.gateway_error();
            tracing::error!("Failed to send message: {}", e);
            Err((StatusCode::BAD_GATEWAY, format!("Gateway error: {e}")))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub tenant_id: String,
    /// Dashboards send the bound name along. The registry binding is
    /// authoritative; a mismatch is logged and the binding wins.
    #[serde(default)]
    pub instance_name: Option<String>,
}

/// Always succeeds: a session that is already gone and a clean logout look
/// the same to the caller. Failures are logged and the registry row keeps
/// its disconnected status either way.
pub async fn logout_whatsapp_handler(
    State(state): State<AppState>,
    Json(request): Json<LogoutRequest>,
) -> Json<Value> {
    match &state.provisioner {
        Some(provisioner) => match provisioner.logout(&request.tenant_id).await {
            Ok(bound) => {
                note_unexpected_instance(request.instance_name.as_deref(), bound.as_deref());
            }
            Err(e) => tracing::error!("Logout failed: {:#}", e),
        },
        None => {
            // No gateway to notify; still honor the registry side.
            match state
                .repository
                .find_instance_by_tenant(&request.tenant_id)
                .await
            {
                Ok(Some(instance)) => {
                    note_unexpected_instance(
                        request.instance_name.as_deref(),
                        Some(&instance.instance_name),
                    );
                    if let Err(e) = state
                        .repository
                        .update_instance_status(
                            &instance.instance_name,
                            InstanceStatus::Disconnected,
                        )
                        .await
                    {
                        tracing::error!("Logout failed: {:#}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!("Logout failed: {:#}", e),
            }
        }
    }
    Json(json!({"success": true}))
}

fn note_unexpected_instance(requested: Option<&str>, bound: Option<&str>) {
    if let (Some(requested), Some(bound)) = (requested, bound) {
        if requested != bound {
            tracing::warn!(
                requested,
                bound,
                "logout named an instance other than the tenant's binding"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_accepts_every_shipped_phone_key() {
        for body in [
            r#"{"instanceName": "copilot_vida_t1", "phone": "5511999998888", "text": "oi"}"#,
            r#"{"instanceName": "copilot_vida_t1", "recipientPhone": "5511999998888", "text": "oi"}"#,
            r#"{"instanceName": "copilot_vida_t1", "number": "5511999998888", "text": "oi"}"#,
        ] {
            let request: SendMessageRequest = serde_json::from_str(body).unwrap();
            assert_eq!(request.instance_name, "copilot_vida_t1");
            assert_eq!(request.phone, "5511999998888", "failed for {body}");
            assert_eq!(request.text, "oi");
        }
    }

    #[test]
    fn logout_request_takes_optional_instance_name() {
        let request: LogoutRequest =
            serde_json::from_str(r#"{"tenantId": "t1", "instanceName": "copilot_vida_t1"}"#)
                .unwrap();
        assert_eq!(request.tenant_id, "t1");
        assert_eq!(request.instance_name.as_deref(), Some("copilot_vida_t1"));

        let request: LogoutRequest = serde_json::from_str(r#"{"tenantId": "t1"}"#).unwrap();
        assert!(request.instance_name.is_none());
    }
}
