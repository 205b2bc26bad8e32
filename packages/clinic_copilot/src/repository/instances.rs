//! Instance registry: tenant <-> gateway session bindings.
//!
//! Webhook events only carry an instance name, so this table is the sole
//! authority for mapping events back to a tenant. Rows are upserted before
//! the gateway ever hears about a session, and logout only flips status so
//! the binding survives for late events.

use anyhow::{Context, Result};
use sqlx::Row;
use uuid::Uuid;

use super::CrmRepository;
use crate::models::{InstanceStatus, MessagingInstance};

impl CrmRepository {
    /// Bind `instance_name` to `tenant_id`, replacing any previous binding
    /// for that tenant. Re-running with the same name keeps the current
    /// status; a new name resets the session to uninitialized.
    pub async fn upsert_instance(&self, tenant_id: &str, instance_name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO whatsapp_instances (id, tenant_id, instance_name, status)
            VALUES (?, ?, ?, 'uninitialized')
            ON CONFLICT (tenant_id) DO UPDATE SET
                instance_name = excluded.instance_name,
                status = CASE
                    WHEN whatsapp_instances.instance_name = excluded.instance_name
                    THEN whatsapp_instances.status
                    ELSE 'uninitialized'
                END,
                updated_at = unixepoch()
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tenant_id)
        .bind(instance_name)
        .execute(&self.pool)
        .await
        .context("Failed to upsert instance")?;
        Ok(())
    }

    /// Tenant owning `instance_name`, or None for names this server never
    /// provisioned. Callers drop events that resolve to None.
    pub async fn resolve_tenant(&self, instance_name: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT tenant_id FROM whatsapp_instances WHERE instance_name = ?")
            .bind(instance_name)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to resolve tenant")?;
        Ok(row.map(|r| r.get("tenant_id")))
    }

    /// Returns false when no such instance exists. Safe to replay.
    pub async fn update_instance_status(
        &self,
        instance_name: &str,
        status: InstanceStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE whatsapp_instances SET status = ?, updated_at = unixepoch()
             WHERE instance_name = ?",
        )
        .bind(status.as_str())
        .bind(instance_name)
        .execute(&self.pool)
        .await
        .context("Failed to update instance status")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_instance_by_tenant(
        &self,
        tenant_id: &str,
    ) -> Result<Option<MessagingInstance>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, instance_name, status, created_at, updated_at
             FROM whatsapp_instances WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find instance by tenant")?;
        Ok(row.map(row_to_instance))
    }

    pub async fn find_instance_by_name(
        &self,
        instance_name: &str,
    ) -> Result<Option<MessagingInstance>> {
        let row = sqlx::query(
            "SELECT id, tenant_id, instance_name, status, created_at, updated_at
             FROM whatsapp_instances WHERE instance_name = ?",
        )
        .bind(instance_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find instance by name")?;
        Ok(row.map(row_to_instance))
    }
}

fn row_to_instance(r: sqlx::sqlite::SqliteRow) -> MessagingInstance {
    let status: String = r.get("status");
    MessagingInstance {
        id: r.get("id"),
        tenant_id: r.get("tenant_id"),
        instance_name: r.get("instance_name"),
        status: InstanceStatus::parse(&status).unwrap_or(InstanceStatus::Uninitialized),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_helpers::test_repository;
    use crate::models::InstanceStatus;

    #[tokio::test]
    async fn upsert_creates_binding() {
        let repo = test_repository().await;
        repo.upsert_instance("tenant-a", "copilot_vida_a1b2c3d4")
            .await
            .unwrap();

        let tenant = repo.resolve_tenant("copilot_vida_a1b2c3d4").await.unwrap();
        assert_eq!(tenant.as_deref(), Some("tenant-a"));

        let instance = repo
            .find_instance_by_tenant("tenant-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.instance_name, "copilot_vida_a1b2c3d4");
        assert_eq!(instance.status, InstanceStatus::Uninitialized);
    }

    #[tokio::test]
    async fn upsert_same_name_preserves_status() {
        let repo = test_repository().await;
        repo.upsert_instance("tenant-a", "copilot_vida_a1b2c3d4")
            .await
            .unwrap();
        repo.update_instance_status("copilot_vida_a1b2c3d4", InstanceStatus::Connected)
            .await
            .unwrap();

        // Re-provisioning with the same label must not reset a live session.
        repo.upsert_instance("tenant-a", "copilot_vida_a1b2c3d4")
            .await
            .unwrap();
        let instance = repo
            .find_instance_by_tenant("tenant-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, InstanceStatus::Connected);
    }

    #[tokio::test]
    async fn upsert_new_name_replaces_binding_and_resets_status() {
        let repo = test_repository().await;
        repo.upsert_instance("tenant-a", "copilot_old_a1b2c3d4")
            .await
            .unwrap();
        repo.update_instance_status("copilot_old_a1b2c3d4", InstanceStatus::Connected)
            .await
            .unwrap();

        repo.upsert_instance("tenant-a", "copilot_new_a1b2c3d4")
            .await
            .unwrap();

        // Old name no longer resolves, new one does, still one row.
        assert!(repo.resolve_tenant("copilot_old_a1b2c3d4").await.unwrap().is_none());
        assert_eq!(
            repo.resolve_tenant("copilot_new_a1b2c3d4")
                .await
                .unwrap()
                .as_deref(),
            Some("tenant-a")
        );
        let instance = repo
            .find_instance_by_tenant("tenant-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, InstanceStatus::Uninitialized);
    }

    #[tokio::test]
    async fn resolve_unknown_instance_is_none() {
        let repo = test_repository().await;
        assert!(repo.resolve_tenant("copilot_ghost_0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_reports_missing_instance() {
        let repo = test_repository().await;
        let updated = repo
            .update_instance_status("copilot_ghost_0", InstanceStatus::Connected)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn update_status_is_idempotent() {
        let repo = test_repository().await;
        repo.upsert_instance("tenant-a", "copilot_vida_a1b2c3d4")
            .await
            .unwrap();
        for _ in 0..3 {
            assert!(
                repo.update_instance_status("copilot_vida_a1b2c3d4", InstanceStatus::Disconnected)
                    .await
                    .unwrap()
            );
        }
        let instance = repo
            .find_instance_by_tenant("tenant-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.status, InstanceStatus::Disconnected);
    }

    #[tokio::test]
    async fn tenants_keep_separate_instances() {
        let repo = test_repository().await;
        repo.upsert_instance("tenant-a", "copilot_vida_a1b2c3d4")
            .await
            .unwrap();
        repo.upsert_instance("tenant-b", "copilot_sorriso_b5c6d7e8")
            .await
            .unwrap();

        assert_eq!(
            repo.resolve_tenant("copilot_vida_a1b2c3d4")
                .await
                .unwrap()
                .as_deref(),
            Some("tenant-a")
        );
        assert_eq!(
            repo.resolve_tenant("copilot_sorriso_b5c6d7e8")
                .await
                .unwrap()
                .as_deref(),
            Some("tenant-b")
        );
    }

    #[tokio::test]
    async fn find_by_name_returns_full_row() {
        let repo = test_repository().await;
        repo.upsert_instance("tenant-a", "copilot_vida_a1b2c3d4")
            .await
            .unwrap();
        let instance = repo
            .find_instance_by_name("copilot_vida_a1b2c3d4")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(instance.tenant_id, "tenant-a");
        assert!(instance.created_at > 0);
    }
}
