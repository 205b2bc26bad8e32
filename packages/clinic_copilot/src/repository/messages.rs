//! Append-only conversation history.

use anyhow::{Context, Result};
use sqlx::Row;
use uuid::Uuid;

use super::CrmRepository;
use crate::models::{ConversationMessage, MessageDirection};

impl CrmRepository {
    /// Append one chat message to a lead's history. Rows are never updated
    /// or deleted afterwards.
    pub async fn append_message(
        &self,
        lead_id: &str,
        phone: &str,
        direction: MessageDirection,
        body: &str,
        timestamp: i64,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO messages (id, lead_id, phone, direction, body, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(lead_id)
        .bind(phone)
        .bind(direction.as_str())
        .bind(body)
        .bind(direction.delivery_status())
        .bind(timestamp)
        .execute(&self.pool)
        .await
        .context("Failed to append message")?;
        Ok(id)
    }

    /// Conversation in event-timestamp order, oldest first.
    pub async fn list_messages(&self, lead_id: &str) -> Result<Vec<ConversationMessage>> {
        let rows = sqlx::query(
            "SELECT id, lead_id, phone, direction, body, status, created_at
             FROM messages WHERE lead_id = ?
             ORDER BY created_at ASC",
        )
        .bind(lead_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list messages")?;
        Ok(rows.into_iter().map(row_to_message).collect())
    }

    pub async fn count_messages(&self, lead_id: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE lead_id = ?")
            .bind(lead_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count messages")
    }
}

fn row_to_message(r: sqlx::sqlite::SqliteRow) -> ConversationMessage {
    let direction: String = r.get("direction");
    ConversationMessage {
        id: r.get("id"),
        lead_id: r.get("lead_id"),
        phone: r.get("phone"),
        direction: MessageDirection::parse(&direction).unwrap_or(MessageDirection::Inbound),
        body: r.get("body"),
        status: r.get("status"),
        created_at: r.get("created_at"),
    }
}
