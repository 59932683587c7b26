//! In-memory tenancy store for tests and single-process setups.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    tidechat_common::{HostId, TenantId},
    tokio::sync::Mutex,
};

use crate::{
    Result,
    store::TenancyStore,
    types::{DatabaseHost, Tenant},
};

#[derive(Default)]
pub struct MemoryTenancyStore {
    hosts: Mutex<HashMap<HostId, DatabaseHost>>,
    tenants: Mutex<HashMap<TenantId, Tenant>>,
}

impl MemoryTenancyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenancyStore for MemoryTenancyStore {
    async fn load_hosts(&self) -> Result<Vec<DatabaseHost>> {
        Ok(self.hosts.lock().await.values().cloned().collect())
    }

    async fn save_host(&self, host: &DatabaseHost) -> Result<()> {
        self.hosts.lock().await.insert(host.id, host.clone());
        Ok(())
    }

    async fn load_tenants(&self) -> Result<Vec<Tenant>> {
        Ok(self.tenants.lock().await.values().cloned().collect())
    }

    async fn get_tenant(&self, id: TenantId) -> Result<Option<Tenant>> {
        Ok(self.tenants.lock().await.get(&id).cloned())
    }

    async fn save_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.tenants.lock().await.insert(tenant.id, tenant.clone());
        Ok(())
    }

    async fn tenant_count(&self, host_id: HostId) -> Result<u32> {
        let tenants = self.tenants.lock().await;
        Ok(tenants
            .values()
            .filter(|t| t.host_id == host_id && !t.status.is_terminal())
            .count() as u32)
    }
}
