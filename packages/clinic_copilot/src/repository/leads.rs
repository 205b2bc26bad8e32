//! Lead persistence for the ingestion pipeline and the dashboard API.

use anyhow::{Context, Result};
use sqlx::Row;
use uuid::Uuid;

use super::CrmRepository;
use crate::models::{Lead, LeadStatus, Temperature};

/// Result of the message-driven lead upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedLead {
    pub lead_id: String,
    pub created: bool,
}

impl CrmRepository {
    /// Insert-or-update a lead from one chat message, atomically.
    ///
    /// Concurrent first contacts race inside SQLite on UNIQUE(tenant_id,
    /// phone), never in application code. The insert arm writes status
    /// 'new' and the update arm always escalates away from 'new', so the
    /// returned status doubles as the created/updated discriminator.
    ///
    /// Stages beyond 'new' are owned by staff and never touched here. An
    /// empty `display_name` keeps whatever name is already stored.
    pub async fn upsert_lead_for_message(
        &self,
        tenant_id: &str,
        phone: &str,
        display_name: &str,
        body: &str,
        timestamp: i64,
    ) -> Result<MaterializedLead> {
        let row = sqlx::query(
            r#"
            INSERT INTO leads (id, tenant_id, phone, name, status, temperature, source,
                               last_message, last_interaction)
            VALUES (?, ?, ?, ?, 'new', 'cold', 'WhatsApp', ?, ?)
            ON CONFLICT (tenant_id, phone) DO UPDATE SET
                name = CASE WHEN excluded.name != '' THEN excluded.name ELSE leads.name END,
                status = CASE WHEN leads.status = 'new' THEN 'conversation' ELSE leads.status END,
                last_message = excluded.last_message,
                last_interaction = excluded.last_interaction,
                updated_at = unixepoch()
            RETURNING id, status
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(phone)
        .bind(display_name)
        .bind(body)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await
        .context("Failed to upsert lead")?;

        let status: String = row.get("status");
        Ok(MaterializedLead {
            lead_id: row.get("id"),
            created: status == "new",
        })
    }

    pub async fn get_lead(&self, id: &str) -> Result<Option<Lead>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, phone, name, status, temperature, source,
                    last_message, last_interaction, created_at, updated_at
             FROM leads WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get lead")?;
        Ok(row.map(row_to_lead))
    }

    pub async fn find_lead_by_phone(&self, tenant_id: &str, phone: &str) -> Result<Option<Lead>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, phone, name, status, temperature, source,
                    last_message, last_interaction, created_at, updated_at
             FROM leads WHERE tenant_id = ? AND phone = ?",
        )
        .bind(tenant_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find lead by phone")?;
        Ok(row.map(row_to_lead))
    }

    /// All leads for one tenant, most recently contacted first.
    pub async fn list_leads(&self, tenant_id: &str) -> Result<Vec<Lead>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, phone, name, status, temperature, source,
                    last_message, last_interaction, created_at, updated_at
             FROM leads WHERE tenant_id = ?
             ORDER BY COALESCE(last_interaction, created_at) DESC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list leads")?;
        Ok(rows.into_iter().map(row_to_lead).collect())
    }

    /// Staff-driven pipeline edit. Fields left as None keep their value.
    pub async fn update_lead_pipeline(
        &self,
        id: &str,
        status: Option<LeadStatus>,
        temperature: Option<Temperature>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE leads SET
                status = COALESCE(?, status),
                temperature = COALESCE(?, temperature),
                updated_at = unixepoch()
             WHERE id = ?",
        )
        .bind(status.map(|s| s.as_str()))
        .bind(temperature.map(|t| t.as_str()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update lead")?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_lead(r: sqlx::sqlite::SqliteRow) -> Lead {
    let status: String = r.get("status");
    let temperature: String = r.get("temperature");
    Lead {
        id: r.get("id"),
        tenant_id: r.get("tenant_id"),
        phone: r.get("phone"),
        name: r.get("name"),
        status: LeadStatus::parse(&status).unwrap_or(LeadStatus::New),
        temperature: Temperature::parse(&temperature).unwrap_or(Temperature::Cold),
        source: r.get("source"),
        last_message: r.get("last_message"),
        last_interaction: r.get("last_interaction"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}
