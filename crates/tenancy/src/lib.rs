//! Tenant routing: maps tenants to their assigned database hosts and hands
//! out capacity-aware host assignments for provisioning.
//!
//! The host table is a process-wide read-mostly arena; capacity counters are
//! only mutated under the routing table's lock so two concurrent provisioning
//! jobs can never overbook a host.

pub mod error;
pub mod routing;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Error, Result},
    routing::RoutingTable,
    store::TenancyStore,
    store_memory::MemoryTenancyStore,
    store_sqlite::SqliteTenancyStore,
    types::{
        ConnectionParams, DatabaseHost, HostConstraints, HostStatus, Tenant, TenantCreate,
        TenantStatus,
    },
};

/// Run database migrations for the tenancy crate.
///
/// Creates the `hosts` and `tenants` tables. Call at application startup
/// when using [`SqliteTenancyStore`] with a shared pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
