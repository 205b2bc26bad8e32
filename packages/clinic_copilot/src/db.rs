//! SQLite database layer: pool setup, migrations and stats.

use anyhow::{Context, Result, bail};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::config::CopilotConfig;

/// Current schema version - increment when adding migrations
const SCHEMA_VERSION: i64 = 1;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &CopilotConfig) -> Result<Self> {
        info!("🗄️  Opening database at {}", config.db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect(&config.db_url())
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;

        // WAL keeps the webhook writer from blocking dashboard reads.
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await
            .context("Failed to enable WAL mode")?;
        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&pool)
            .await
            .context("Failed to set synchronous mode")?;
        sqlx::query("PRAGMA cache_size = -64000")
            .execute(&pool)
            .await
            .context("Failed to set cache size")?;
        sqlx::query("PRAGMA temp_store = MEMORY")
            .execute(&pool)
            .await
            .context("Failed to set temp store")?;
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .context("Failed to enable foreign keys")?;

        run_migrations(&pool).await?;

        info!("✅ Database ready");
        Ok(Self { pool })
    }

    pub async fn get_stats(&self) -> Result<DbStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM whatsapp_instances) as instances,
                (SELECT COUNT(*) FROM whatsapp_instances WHERE status = 'connected') as connected_instances,
                (SELECT COUNT(*) FROM leads) as leads,
                (SELECT COUNT(*) FROM messages) as messages,
                (SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()) as db_size
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to query database stats")?;

        Ok(DbStats {
            instances: row.get::<i64, _>("instances") as u64,
            connected_instances: row.get::<i64, _>("connected_instances") as u64,
            leads: row.get::<i64, _>("leads") as u64,
            messages: row.get::<i64, _>("messages") as u64,
            database_size_bytes: row.get::<i64, _>("db_size") as u64,
        })
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DbStats {
    pub instances: u64,
    pub connected_instances: u64,
    pub leads: u64,
    pub messages: u64,
    pub database_size_bytes: u64,
}

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create schema_version table")?;

    let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
        .fetch_one(pool)
        .await
        .context("Failed to read schema version")?;

    if current > SCHEMA_VERSION {
        bail!(
            "Database schema version {} is newer than supported version {}",
            current,
            SCHEMA_VERSION
        );
    }
    if current == SCHEMA_VERSION {
        debug!("Schema up to date at version {}", current);
        return Ok(());
    }

    info!("Migrating schema from version {} to {}", current, SCHEMA_VERSION);

    // One row per tenant: ON CONFLICT (tenant_id) in the registry upsert
    // depends on the UNIQUE constraint here.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS whatsapp_instances (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL UNIQUE,
            instance_name TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'uninitialized',
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create whatsapp_instances table")?;

    // UNIQUE(tenant_id, phone) is what makes concurrent first-contact safe;
    // the lead upsert races resolve inside SQLite, not in application code.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            phone TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'new',
            temperature TEXT NOT NULL DEFAULT 'cold',
            source TEXT NOT NULL DEFAULT 'WhatsApp',
            last_message TEXT,
            last_interaction INTEGER,
            created_at INTEGER NOT NULL DEFAULT (unixepoch()),
            updated_at INTEGER NOT NULL DEFAULT (unixepoch()),
            UNIQUE (tenant_id, phone)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create leads table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            lead_id TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
            phone TEXT NOT NULL,
            direction TEXT NOT NULL,
            body TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'received',
            created_at INTEGER NOT NULL DEFAULT (unixepoch())
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create messages table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_leads_tenant_interaction
         ON leads (tenant_id, last_interaction DESC)",
    )
    .execute(pool)
    .await
    .context("Failed to create leads index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_lead_created
         ON messages (lead_id, created_at)",
    )
    .execute(pool)
    .await
    .context("Failed to create messages index")?;

    sqlx::query("INSERT OR REPLACE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await
        .context("Failed to record schema version")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn run_migrations_is_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn schema_version_recorded() {
        let pool = test_pool().await;
        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn all_tables_exist_after_migration() {
        let pool = test_pool().await;
        for table in ["whatsapp_instances", "leads", "messages", "schema_version"] {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[tokio::test]
    async fn duplicate_lead_per_tenant_rejected() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO leads (id, tenant_id, phone) VALUES ('a', 't1', '5511999998888')")
            .execute(&pool)
            .await
            .unwrap();
        let dup = sqlx::query(
            "INSERT INTO leads (id, tenant_id, phone) VALUES ('b', 't1', '5511999998888')",
        )
        .execute(&pool)
        .await;
        assert!(dup.is_err());

        // Same phone under another tenant is a different lead.
        sqlx::query("INSERT INTO leads (id, tenant_id, phone) VALUES ('c', 't2', '5511999998888')")
            .execute(&pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn one_instance_row_per_tenant() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO whatsapp_instances (id, tenant_id, instance_name) VALUES ('a', 't1', 'copilot_one_1')",
        )
        .execute(&pool)
        .await
        .unwrap();
        let dup = sqlx::query(
            "INSERT INTO whatsapp_instances (id, tenant_id, instance_name) VALUES ('b', 't1', 'copilot_two_2')",
        )
        .execute(&pool)
        .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn stats_count_rows() {
        let pool = test_pool().await;
        sqlx::query(
            "INSERT INTO whatsapp_instances (id, tenant_id, instance_name, status)
             VALUES ('a', 't1', 'copilot_one_1', 'connected')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO leads (id, tenant_id, phone) VALUES ('l1', 't1', '551198887777')")
            .execute(&pool)
            .await
            .unwrap();

        let db = Database { pool };
        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.instances, 1);
        assert_eq!(stats.connected_instances, 1);
        assert_eq!(stats.leads, 1);
        assert_eq!(stats.messages, 0);
        assert!(stats.database_size_bytes > 0);
    }
}
