//! SQLite-backed tenancy store using sqlx.
//!
//! Rows are stored as JSON blobs with the columns the routing table filters
//! on (host, status) denormalized for indexing.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions},
    tidechat_common::{HostId, TenantId},
};

use crate::{
    Result,
    store::TenancyStore,
    types::{DatabaseHost, Tenant},
};

pub struct SqliteTenancyStore {
    pool: SqlitePool,
}

impl SqliteTenancyStore {
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
}

#[async_trait]
impl TenancyStore for SqliteTenancyStore {
    async fn load_hosts(&self) -> Result<Vec<DatabaseHost>> {
        let rows = sqlx::query("SELECT data FROM hosts")
            .fetch_all(&self.pool)
            .await?;

        let mut hosts = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.get("data");
            hosts.push(serde_json::from_str(&data)?);
        }
        Ok(hosts)
    }

    async fn save_host(&self, host: &DatabaseHost) -> Result<()> {
        let data = serde_json::to_string(host)?;
        sqlx::query(
            "INSERT INTO hosts (id, data) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
        )
        .bind(host.id.to_string())
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query("SELECT data FROM tenants")
            .fetch_all(&self.pool)
            .await?;

        let mut tenants = Vec::with_capacity(rows.len());
        for row in rows {
            let data: String = row.get("data");
            tenants.push(serde_json::from_str(&data)?);
        }
        Ok(tenants)
    }

    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        let row = sqlx::query("SELECT data FROM tenants WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: String = row.get("data");
                Ok(Some(serde_json::from_str(&data)?))
            },
            None => Ok(None),
        }
    }

    async fn save_tenant(&self, tenant: &Tenant) -> Result<()> {
        let data = serde_json::to_string(tenant)?;
        // Store the bare token ("active", not "\"active\"") for the index.
        let status = serde_json::to_string(&tenant.status)?
            .trim_matches('"')
            .to_string();
        sqlx::query(
            "INSERT INTO tenants (id, host_id, status, data) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               host_id = excluded.host_id,
               status = excluded.status,
               data = excluded.data",
        )
        .bind(tenant.id.to_string())
        .bind(tenant.host_id.to_string())
        .bind(&status)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tenant_count(&self, host_id: HostId) -> Result<u32> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM tenants
             WHERE host_id = ? AND status NOT IN ('deleted', 'failed')",
        )
        .bind(host_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as u32)
    }
}
