//! Domain types shared across the registry, pipeline and HTTP surface.

use serde::{Deserialize, Serialize};

/// Connection status of a gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Uninitialized => "uninitialized",
            InstanceStatus::Connecting => "connecting",
            InstanceStatus::Connected => "connected",
            InstanceStatus::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uninitialized" => Some(InstanceStatus::Uninitialized),
            "connecting" => Some(InstanceStatus::Connecting),
            "connected" => Some(InstanceStatus::Connected),
            "disconnected" => Some(InstanceStatus::Disconnected),
            _ => None,
        }
    }
}

/// One external gateway session, bound 1:1 to a tenant.
#[derive(Debug, Clone, Serialize)]
pub struct MessagingInstance {
    pub id: String,
    pub tenant_id: String,
    pub instance_name: String,
    pub status: InstanceStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Pipeline stage of a lead. Only `new -> conversation` is advanced by the
/// ingestion pipeline; later stages are set by staff through the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadStatus {
    New,
    Conversation,
    Scheduled,
    Won,
    Lost,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Conversation => "conversation",
            LeadStatus::Scheduled => "scheduled",
            LeadStatus::Won => "won",
            LeadStatus::Lost => "lost",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(LeadStatus::New),
            "conversation" => Some(LeadStatus::Conversation),
            "scheduled" => Some(LeadStatus::Scheduled),
            "won" => Some(LeadStatus::Won),
            "lost" => Some(LeadStatus::Lost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temperature {
    Cold,
    Warm,
    Hot,
}

impl Temperature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Temperature::Cold => "cold",
            Temperature::Warm => "warm",
            Temperature::Hot => "hot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cold" => Some(Temperature::Cold),
            "warm" => Some(Temperature::Warm),
            "hot" => Some(Temperature::Hot),
            _ => None,
        }
    }
}

/// A CRM contact, unique per (tenant, phone).
#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    pub id: String,
    pub tenant_id: String,
    pub phone: String,
    pub name: String,
    pub status: LeadStatus,
    pub temperature: Temperature,
    pub source: String,
    pub last_message: Option<String>,
    pub last_interaction: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(MessageDirection::Inbound),
            "outbound" => Some(MessageDirection::Outbound),
            _ => None,
        }
    }

    /// Delivery status recorded alongside a stored message.
    pub fn delivery_status(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "received",
            MessageDirection::Outbound => "sent",
        }
    }
}

/// One append-only chat record. `created_at` carries the event timestamp,
/// not the arrival time, so history sorts correctly under reordering.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationMessage {
    pub id: String,
    pub lead_id: String,
    pub phone: String,
    pub direction: MessageDirection,
    pub body: String,
    pub status: String,
    pub created_at: i64,
}
