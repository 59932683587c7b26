//! SQLite-backed message store using sqlx.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
    tidechat_common::{MessageId, TenantId},
};

use crate::{Result, store::MessageStore, types::Message};

pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Create a store with its own connection pool and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        crate::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a store using an existing pool (migrations must already be run).
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    let data: String = row.get("data");
    Ok(serde_json::from_str(&data)?)
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn get(&self, tenant_id: TenantId, id: MessageId) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT data FROM messages WHERE tenant_id = ? AND id = ?")
            .bind(tenant_id.to_string())
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn get_by_external_id(
        &self,
        tenant_id: TenantId,
        external_id: &str,
    ) -> Result<Option<Message>> {
        let row = sqlx::query(
            "SELECT data FROM messages WHERE tenant_id = ? AND external_message_id = ?",
        )
        .bind(tenant_id.to_string())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn upsert(&self, message: &Message) -> Result<()> {
        let data = serde_json::to_string(message)?;
        sqlx::query(
            "INSERT INTO messages (id, tenant_id, external_message_id, data)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(tenant_id, id) DO UPDATE SET
               external_message_id = excluded.external_message_id,
               data = excluded.data",
        )
        .bind(message.id.to_string())
        .bind(message.tenant_id.to_string())
        .bind(&message.external_message_id)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{Message, MessageStatus},
        tidechat_common::ChatId,
    };

    async fn temp_store() -> (SqliteMessageStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/messages.db?mode=rwc", dir.path().display());
        (SqliteMessageStore::new(&url).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn test_upsert_and_lookup_by_external_id() {
        let (store, _dir) = temp_store().await;
        let tenant = TenantId::new();
        let mut msg = Message::outbound(tenant, ChatId::new(), "hello");
        msg.external_message_id = Some("EXT-1".into());
        store.upsert(&msg).await.unwrap();

        let found = store
            .get_by_external_id(tenant, "EXT-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, msg);

        // External ids belong to one tenant only.
        assert!(
            store
                .get_by_external_id(TenantId::new(), "EXT-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let (store, _dir) = temp_store().await;
        let tenant = TenantId::new();
        let mut msg = Message::outbound(tenant, ChatId::new(), "hello");
        store.upsert(&msg).await.unwrap();

        msg.status = MessageStatus::Sent;
        store.upsert(&msg).await.unwrap();

        let found = store.get(tenant, msg.id).await.unwrap().unwrap();
        assert_eq!(found.status, MessageStatus::Sent);
    }
}
