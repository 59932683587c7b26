//! SQLite-backed channel store using sqlx.
//!
//! Rows are stored as JSON blobs with the columns lookups filter on
//! (instance name, status) denormalized for indexing.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
    tidechat_common::ChannelId,
};

use crate::{Result, store::ChannelStore, types::Channel};

pub struct SqliteChannelStore {
    pool: SqlitePool,
}

impl SqliteChannelStore {
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
    ///
    /// Call [`crate::run_migrations`] before using this constructor.
    #[must_use]
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Channel> {
        let data: String = row.get("data");
        Ok(serde_json::from_str(&data)?)
    }
}

#[async_trait]
impl ChannelStore for SqliteChannelStore {
    async fn save(&self, channel: &Channel) -> Result<()> {
        let data = serde_json::to_string(channel)?;
        sqlx::query(
            "INSERT INTO channels (id, instance_name, status, data) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               instance_name = excluded.instance_name,
               status        = excluded.status,
               data          = excluded.data",
        )
        .bind(channel.id.to_string())
        .bind(&channel.external_instance_name)
        .bind(channel.status.as_str())
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: ChannelId) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT data FROM channels WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn find_by_instance(&self, instance: &str) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT data FROM channels WHERE instance_name = ?")
            .bind(instance)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::decode).transpose()
    }

    async fn list(&self) -> Result<Vec<Channel>> {
        let rows = sqlx::query("SELECT data FROM channels")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::decode).collect()
    }

    async fn delete(&self, id: ChannelId) -> Result<()> {
        sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
