//! SQLite-backed job store using sqlx.
//!
//! The broker store is shared across tenants; it is deliberately NOT a
//! tenant database.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
};

use crate::{
    Result,
    store::JobStore,
    types::{Job, JobState},
};

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
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

fn state_token(state: JobState) -> &'static str {
    match state {
        JobState::Pending => "pending",
        JobState::Active => "active",
        JobState::Delayed => "delayed",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<Job> {
    let data: String = row.get("data");
    Ok(serde_json::from_str(&data)?)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn load_all(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT data FROM jobs")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn upsert(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string(job)?;
        sqlx::query(
            "INSERT INTO jobs (queue, key, state, next_eligible_at_ms, data)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(queue, key) DO UPDATE SET
               state = excluded.state,
               next_eligible_at_ms = excluded.next_eligible_at_ms,
               data = excluded.data",
        )
        .bind(&job.queue)
        .bind(&job.key)
        .bind(state_token(job.state))
        .bind(job.next_eligible_at_ms as i64)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, queue: &str, key: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT data FROM jobs WHERE queue = ? AND key = ?")
            .bind(queue)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn due(&self, queue: &str, now_ms: u64, limit: usize) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT data FROM jobs
             WHERE queue = ? AND state IN ('pending', 'delayed')
               AND next_eligible_at_ms <= ?
             ORDER BY next_eligible_at_ms ASC
             LIMIT ?",
        )
        .bind(queue)
        .bind(now_ms as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(decode).collect()
    }

    async fn failed(&self, queue: &str) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT data FROM jobs WHERE queue = ? AND state = 'failed'")
            .bind(queue)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode).collect()
    }

    async fn delete(&self, queue: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE queue = ? AND key = ?")
            .bind(queue)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
