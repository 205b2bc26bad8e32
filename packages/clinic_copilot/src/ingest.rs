//! Webhook ingestion pipeline.
//!
//! The HTTP handler acks every delivery with 200 and hands the payload to
//! `process_event` on a background task. From here on nothing can bounce
//! back to the gateway: events are either applied or dropped, and drops are
//! visible only through logs and metrics.
//!
//! Tenancy is enforced at the front of the pipeline. An event whose
//! instance name does not resolve through the registry is discarded before
//! any state is touched.

use serde_json::Value;
use tracing::{debug, error};

use crate::metrics::ServerMetrics;
use crate::models::{InstanceStatus, MessageDirection};
use crate::repository::{CrmRepository, MaterializedLead};

pub const EVENT_CONNECTION_UPDATE: &str = "CONNECTION_UPDATE";
pub const EVENT_MESSAGES_UPSERT: &str = "MESSAGES_UPSERT";
pub const EVENT_QRCODE_UPDATED: &str = "QRCODE_UPDATED";

/// Envelope the gateway posts to the webhook. Everything is optional: the
/// pipeline decides what to do with partial payloads, not the deserializer.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub instance: Option<String>,
    /// Some gateway builds label the kind `eventType` instead of `event`.
    #[serde(default, alias = "eventType")]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Value,
}

pub fn parse_event(body: &str) -> Option<WebhookEvent> {
    serde_json::from_str(body).ok()
}

/// Gateways deliver the same event as "messages.upsert" or
/// "MESSAGES_UPSERT" depending on version; fold both into one key.
pub fn normalize_event_kind(raw: &str) -> String {
    raw.trim().to_uppercase().replace('.', "_")
}

/// Gateway connection vocabulary folded into the registry's status set.
/// Anything unrecognized reads as disconnected rather than connected.
pub fn map_connection_state(raw: &str) -> InstanceStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "open" => InstanceStatus::Connected,
        "connecting" => InstanceStatus::Connecting,
        _ => InstanceStatus::Disconnected,
    }
}

/// Text content from the closed set of payload shapes we materialize:
/// plain conversation, extended text, media caption. Anything else
/// (stickers, reactions, audio, location) yields None.
pub fn extract_text(message: &Value) -> Option<String> {
    let candidates = [
        message.get("conversation"),
        message.get("extendedTextMessage").and_then(|m| m.get("text")),
        message.get("imageMessage").and_then(|m| m.get("caption")),
        message.get("videoMessage").and_then(|m| m.get("caption")),
        message.get("documentMessage").and_then(|m| m.get("caption")),
    ];
    for candidate in candidates {
        if let Some(text) = candidate.and_then(Value::as_str) {
            if !text.trim().is_empty() {
                return Some(text.to_string());
            }
        }
    }
    None
}

fn is_group_jid(jid: &str) -> bool {
    jid.ends_with("@g.us")
}

fn is_broadcast_jid(jid: &str) -> bool {
    jid.ends_with("@broadcast")
}

/// Digits of the JID user part: "5511999998888@s.whatsapp.net" -> phone.
fn jid_phone(jid: &str) -> Option<String> {
    let user = jid.split('@').next().unwrap_or("");
    let digits: String = user.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() { None } else { Some(digits) }
}

/// MESSAGES_UPSERT `data` arrives as a single message object, a bare
/// array, or wrapped in `{"messages": [...]}` depending on gateway
/// version. Normalize to a flat list.
fn message_items(data: &Value) -> Vec<&Value> {
    if let Some(items) = data.as_array() {
        return items.iter().collect();
    }
    if let Some(items) = data.get("messages").and_then(Value::as_array) {
        return items.iter().collect();
    }
    if data.is_object() {
        return vec![data];
    }
    Vec::new()
}

fn event_timestamp(item: &Value, fallback: i64) -> i64 {
    match item.get("messageTimestamp") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(fallback),
        Some(Value::String(s)) => s.parse().unwrap_or(fallback),
        _ => fallback,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ExtractedMessage {
    phone: String,
    display_name: Option<String>,
    direction: MessageDirection,
    body: Option<String>,
    timestamp: i64,
}

fn extract_message(item: &Value, fallback_timestamp: i64) -> Option<ExtractedMessage> {
    let key = item.get("key")?;
    let jid = key.get("remoteJid").and_then(Value::as_str)?;
    if is_group_jid(jid) || is_broadcast_jid(jid) {
        debug!(jid, "group or broadcast message skipped");
        return None;
    }
    let phone = jid_phone(jid)?;

    let from_me = key.get("fromMe").and_then(Value::as_bool).unwrap_or(false);
    let direction = if from_me {
        MessageDirection::Outbound
    } else {
        MessageDirection::Inbound
    };
    // pushName on an outbound echo is our own profile name, not the lead's.
    let display_name = if from_me {
        None
    } else {
        item.get("pushName")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };

    Some(ExtractedMessage {
        phone,
        display_name,
        direction,
        body: item.get("message").and_then(extract_text),
        timestamp: event_timestamp(item, fallback_timestamp),
    })
}

/// Apply one webhook event. Infallible by design: failures are logged and
/// counted, never returned, because the ack already went out.
pub async fn process_event(repo: &CrmRepository, metrics: &ServerMetrics, event: WebhookEvent) {
    let Some(instance) = event.instance.as_deref().filter(|s| !s.is_empty()) else {
        debug!("event without instance name dropped");
        metrics.event_ignored();
        return;
    };
    let Some(raw_kind) = event.event.as_deref() else {
        debug!(instance, "event without kind dropped");
        metrics.event_ignored();
        return;
    };
    let kind = normalize_event_kind(raw_kind);

    let tenant_id = match repo.resolve_tenant(instance).await {
        Ok(Some(tenant_id)) => tenant_id,
        Ok(None) => {
            debug!(instance, "event for unknown instance dropped");
            metrics.event_dropped_unknown_instance();
            return;
        }
        Err(e) => {
            error!(instance, "tenant resolution failed: {e:#}");
            metrics.persistence_error();
            return;
        }
    };

    match kind.as_str() {
        EVENT_CONNECTION_UPDATE => {
            handle_connection_update(repo, metrics, instance, &event.data).await;
        }
        EVENT_MESSAGES_UPSERT => {
            handle_messages_upsert(repo, metrics, &tenant_id, &event.data).await;
        }
        EVENT_QRCODE_UPDATED => {
            debug!(instance, "qr code refreshed");
        }
        other => {
            debug!(instance, event = other, "unhandled event kind acknowledged");
            metrics.event_ignored();
        }
    }
}

async fn handle_connection_update(
    repo: &CrmRepository,
    metrics: &ServerMetrics,
    instance: &str,
    data: &Value,
) {
    let raw = data
        .get("state")
        .or_else(|| data.get("connection"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let status = map_connection_state(raw);
    match repo.update_instance_status(instance, status).await {
        Ok(true) => {
            debug!(instance, status = status.as_str(), "connection status updated");
            metrics.status_update();
        }
        Ok(false) => debug!(instance, "status update for missing registry row"),
        Err(e) => {
            error!(instance, "status update failed: {e:#}");
            metrics.persistence_error();
        }
    }
}

async fn handle_messages_upsert(
    repo: &CrmRepository,
    metrics: &ServerMetrics,
    tenant_id: &str,
    data: &Value,
) {
    let now = chrono::Utc::now().timestamp();
    for item in message_items(data) {
        let Some(message) = extract_message(item, now) else {
            metrics.message_skipped();
            continue;
        };
        let Some(body) = message.body else {
            // No materializable text. Inbound this is a non-text payload;
            // outbound it is usually a receipt or reaction echo.
            debug!(
                phone = %message.phone,
                direction = message.direction.as_str(),
                "message without text skipped"
            );
            metrics.message_skipped();
            continue;
        };

        match materialize(
            repo,
            tenant_id,
            &message.phone,
            message.display_name.as_deref(),
            message.direction,
            &body,
            message.timestamp,
        )
        .await
        {
            Ok(lead) => {
                metrics.message_materialized();
                if lead.created {
                    metrics.lead_created();
                }
            }
            Err(e) => {
                // Ack stands; the message is lost but the pipeline keeps going.
                error!(tenant = tenant_id, phone = %message.phone, "materialization failed: {e:#}");
                metrics.persistence_error();
            }
        }
    }
}

/// One atomic lead upsert plus one appended history row.
pub async fn materialize(
    repo: &CrmRepository,
    tenant_id: &str,
    phone: &str,
    display_name: Option<&str>,
    direction: MessageDirection,
    body: &str,
    timestamp: i64,
) -> anyhow::Result<MaterializedLead> {
    let lead = repo
        .upsert_lead_for_message(tenant_id, phone, display_name.unwrap_or(""), body, timestamp)
        .await?;
    repo.append_message(&lead.lead_id, phone, direction, body, timestamp)
        .await?;
    Ok(lead)
}
