//! Server metrics for observability.
//!
//! Counters are plain atomics bumped from handlers and the ingestion
//! pipeline; `snapshot()` turns them into a serializable report for the
//! /metrics endpoint. Dropped-event counters matter here because the
//! webhook acks everything - these numbers are the only visible trace of
//! what the pipeline discarded.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Webhook intake
    webhook_events_received: AtomicU64,
    events_ignored: AtomicU64,
    events_dropped_unknown_instance: AtomicU64,
    messages_skipped: AtomicU64,

    // CRM pipeline
    messages_materialized: AtomicU64,
    leads_created: AtomicU64,
    status_updates: AtomicU64,

    // Gateway traffic
    provision_requests: AtomicU64,
    messages_sent: AtomicU64,
    gateway_errors: AtomicU64,

    // Failures
    persistence_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn webhook_received(&self) {
        self.webhook_events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dropped_unknown_instance(&self) {
        self.events_dropped_unknown_instance
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_skipped(&self) {
        self.messages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_materialized(&self) {
        self.messages_materialized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lead_created(&self) {
        self.leads_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_update(&self) {
        self.status_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provision_request(&self) {
        self.provision_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn gateway_error(&self) {
        self.gateway_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self
                .start_time
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
            webhook: WebhookMetrics {
                events_received: self.webhook_events_received.load(Ordering::Relaxed),
                events_ignored: self.events_ignored.load(Ordering::Relaxed),
                dropped_unknown_instance: self
                    .events_dropped_unknown_instance
                    .load(Ordering::Relaxed),
                messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            },
            crm: CrmMetrics {
                messages_materialized: self.messages_materialized.load(Ordering::Relaxed),
                leads_created: self.leads_created.load(Ordering::Relaxed),
                status_updates: self.status_updates.load(Ordering::Relaxed),
            },
            gateway: GatewayMetrics {
                provision_requests: self.provision_requests.load(Ordering::Relaxed),
                messages_sent: self.messages_sent.load(Ordering::Relaxed),
                errors: self.gateway_errors.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                persistence: self.persistence_errors.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub webhook: WebhookMetrics,
    pub crm: CrmMetrics,
    pub gateway: GatewayMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookMetrics {
    pub events_received: u64,
    pub events_ignored: u64,
    pub dropped_unknown_instance: u64,
    pub messages_skipped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrmMetrics {
    pub messages_materialized: u64,
    pub leads_created: u64,
    pub status_updates: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayMetrics {
    pub provision_requests: u64,
    pub messages_sent: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorMetrics {
    pub persistence: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub instances: InstanceHealth,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceHealth {
    pub total: u64,
    pub connected: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ServerMetrics::new();
        metrics.webhook_received();
        metrics.webhook_received();
        metrics.message_materialized();
        metrics.lead_created();
        metrics.event_dropped_unknown_instance();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.webhook.events_received, 2);
        assert_eq!(snapshot.crm.messages_materialized, 1);
        assert_eq!(snapshot.crm.leads_created, 1);
        assert_eq!(snapshot.webhook.dropped_unknown_instance, 1);
        assert_eq!(snapshot.errors.persistence, 0);
    }

    #[test]
    fn snapshot_serializes_grouped() {
        let metrics = ServerMetrics::new();
        metrics.message_sent();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["gateway"]["messages_sent"], 1);
        assert!(json["webhook"]["events_received"].is_u64());
    }
}
