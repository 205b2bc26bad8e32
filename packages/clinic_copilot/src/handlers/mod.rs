pub mod admin;
pub mod health;
pub mod leads;
pub mod webhook;
pub mod whatsapp;

// Re-export all handlers for easy route registration
pub use admin::database_stats_handler;
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use leads::{lead_messages_handler, list_leads_handler, update_lead_handler};
pub use webhook::evolution_webhook_handler;
pub use whatsapp::{
    connect_whatsapp_handler, logout_whatsapp_handler, send_message_handler,
    whatsapp_status_handler,
};
