//! Persistence trait for tenants and hosts.

use {
    async_trait::async_trait,
    tidechat_common::{HostId, TenantId},
};

use crate::{
    Result,
    types::{DatabaseHost, Tenant},
};

/// Persistence backend for the routing table.
///
/// Writes happen while the routing table holds its arena lock, so
/// implementations do not need their own compare-and-swap logic.
#[async_trait]
pub trait TenancyStore: Send + Sync {
    async fn load_hosts(&self) -> Result<Vec<DatabaseHost>>;
    async fn save_host(&self, host: &DatabaseHost) -> Result<()>;
    async fn load_tenants(&self) -> Result<Vec<Tenant>>;
    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>>;
    async fn save_tenant(&self, tenant: &Tenant) -> Result<()>;
    /// Number of non-terminal tenants assigned to a host.
    async fn tenant_count(&self, host_id: HostId) -> Result<u32>;
}
