//! The tenant routing table and host-capacity arena.

use std::{collections::HashMap, sync::Arc};

use {
    tidechat_common::{HostId, TenantId, now_ms},
    tokio::sync::Mutex,
    tracing::{info, warn},
};

use crate::{
    Error, Result,
    store::TenancyStore,
    types::{
        ConnectionParams, DatabaseHost, HostConstraints, Tenant, TenantCreate, TenantStatus,
    },
};

/// One slot in the host arena: the host plus its live tenant count.
#[derive(Debug, Clone)]
struct HostSlot {
    host: DatabaseHost,
    tenant_count: u32,
}

struct Inner {
    hosts: HashMap<HostId, HostSlot>,
    tenants: HashMap<TenantId, Tenant>,
}

/// Process-wide routing table.
///
/// All capacity mutations happen under one lock: `assign_host` reads the
/// counter, picks a slot, increments the counter, and persists the tenant
/// before releasing it, so concurrent provisioning jobs serialize on the
/// arena instead of racing the store.
pub struct RoutingTable {
    store: Arc<dyn TenancyStore>,
    inner: Mutex<Inner>,
}

impl RoutingTable {
    /// Load hosts and tenants from the store into the arena.
    pub async fn load(store: Arc<dyn TenancyStore>) -> Result<Self> {
        let hosts = store.load_hosts().await?;
        let tenants = store.load_tenants().await?;

        let mut slots = HashMap::with_capacity(hosts.len());
        for host in hosts {
            let tenant_count = tenants
                .iter()
                .filter(|t| t.host_id == host.id && !t.status.is_terminal())
                .count() as u32;
            slots.insert(host.id, HostSlot { host, tenant_count });
        }
        let tenants = tenants.into_iter().map(|t| (t.id, t)).collect();

        info!(hosts = slots.len(), "routing table loaded");
        Ok(Self {
            store,
            inner: Mutex::new(Inner {
                hosts: slots,
                tenants,
            }),
        })
    }

    /// Register (or update) a host in the pool.
    pub async fn register_host(&self, host: DatabaseHost) -> Result<()> {
        self.store.save_host(&host).await?;
        let mut inner = self.inner.lock().await;
        let tenant_count = inner
            .hosts
            .get(&host.id)
            .map(|s| s.tenant_count)
            .unwrap_or_default();
        inner.hosts.insert(host.id, HostSlot { host, tenant_count });
        Ok(())
    }

    /// Resolve the connection parameters for a tenant's database.
    pub async fn resolve_connection(&self, tenant_id: TenantId) -> Result<ConnectionParams> {
        let inner = self.inner.lock().await;
        let tenant = inner
            .tenants
            .get(&tenant_id)
            .ok_or(Error::TenantNotFound { tenant_id })?;

        match tenant.status {
            TenantStatus::Suspended | TenantStatus::Deleted => {
                return Err(Error::tenant_unavailable(tenant_id, tenant.status));
            },
            _ => {},
        }

        let slot = inner
            .hosts
            .get(&tenant.host_id)
            .ok_or_else(|| Error::host_not_found(tenant.host_id))?;

        Ok(ConnectionParams {
            tenant_id,
            address: slot.host.address.clone(),
            port: slot.host.port,
            database_name: tenant.database_name.clone(),
        })
    }

    /// Assign a host with free capacity and create the tenant row on it, as
    /// one atomic step.
    ///
    /// Eligible hosts are `active` with tenant count below `max_tenants` and
    /// matching the constraints. Tie-break: prefer the default host, then
    /// the lowest tenant count, then the lowest host id (deterministic).
    pub async fn assign_host(
        &self,
        create: &TenantCreate,
        constraints: &HostConstraints,
    ) -> Result<Tenant> {
        let mut inner = self.inner.lock().await;

        let chosen = inner
            .hosts
            .values()
            .filter(|s| s.host.matches(constraints) && s.host.has_capacity(s.tenant_count))
            .min_by_key(|s| (!s.host.is_default, s.tenant_count, s.host.id))
            .map(|s| s.host.id)
            .ok_or(Error::NoCapacity)?;

        let now = now_ms();
        let tenant = Tenant {
            id: TenantId::new(),
            slug: create.slug.clone(),
            host_id: chosen,
            database_name: format!("tenant_{}", create.slug.replace('-', "_")),
            region: create.region.clone(),
            tier: create.tier.clone(),
            status: TenantStatus::Provisioning,
            created_at_ms: now,
            updated_at_ms: now,
        };

        // Persist before releasing the lock so a concurrent assign sees the
        // incremented count only alongside a durable tenant row.
        self.store.save_tenant(&tenant).await?;

        if let Some(slot) = inner.hosts.get_mut(&chosen) {
            slot.tenant_count += 1;
        }
        inner.tenants.insert(tenant.id, tenant.clone());

        info!(tenant = %tenant.id, host = %chosen, slug = %tenant.slug, "host assigned");
        Ok(tenant)
    }

    /// Move a tenant to a new lifecycle status.
    ///
    /// Transitions out of a terminal status are rejected with a warn and
    /// left unchanged. Entering a terminal status frees the host slot.
    pub async fn set_tenant_status(&self, tenant_id: TenantId, status: TenantStatus) -> Result<Tenant> {
        let mut inner = self.inner.lock().await;
        let tenant = inner
            .tenants
            .get_mut(&tenant_id)
            .ok_or(Error::TenantNotFound { tenant_id })?;

        if tenant.status.is_terminal() {
            warn!(tenant = %tenant_id, current = ?tenant.status, requested = ?status,
                "ignoring status change on terminal tenant");
            return Ok(tenant.clone());
        }

        let was_counted = !tenant.status.is_terminal();
        tenant.status = status;
        tenant.updated_at_ms = now_ms();
        let updated = tenant.clone();
        self.store.save_tenant(&updated).await?;

        if was_counted && status.is_terminal() {
            if let Some(slot) = inner.hosts.get_mut(&updated.host_id) {
                slot.tenant_count = slot.tenant_count.saturating_sub(1);
            }
        }
        Ok(updated)
    }

    /// Fetch a tenant by id.
    pub async fn get_tenant(&self, tenant_id: TenantId) -> Result<Tenant> {
        let inner = self.inner.lock().await;
        inner
            .tenants
            .get(&tenant_id)
            .cloned()
            .ok_or(Error::TenantNotFound { tenant_id })
    }

    /// Look up a tenant by its slug.
    pub async fn find_by_slug(&self, slug: &str) -> Option<Tenant> {
        let inner = self.inner.lock().await;
        inner.tenants.values().find(|t| t.slug == slug).cloned()
    }

    /// All known hosts with their current tenant counts.
    pub async fn hosts(&self) -> Vec<(DatabaseHost, u32)> {
        let inner = self.inner.lock().await;
        inner
            .hosts
            .values()
            .map(|s| (s.host.clone(), s.tenant_count))
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{store_memory::MemoryTenancyStore, types::HostStatus},
    };

    fn host(max_tenants: u32, is_default: bool) -> DatabaseHost {
        DatabaseHost {
            id: HostId::new(),
            address: "db.internal".into(),
            port: 5432,
            region: None,
            tier: None,
            max_tenants,
            disk_capacity_gb: 128,
            is_default,
            status: HostStatus::Active,
        }
    }

    fn create(slug: &str) -> TenantCreate {
        TenantCreate {
            slug: slug.into(),
            region: None,
            tier: None,
        }
    }

    async fn table_with(hosts: Vec<DatabaseHost>) -> Arc<RoutingTable> {
        let store = Arc::new(MemoryTenancyStore::new());
        let table = RoutingTable::load(store).await.unwrap();
        for h in hosts {
            table.register_host(h).await.unwrap();
        }
        Arc::new(table)
    }

    #[tokio::test]
    async fn test_assign_prefers_default_host() {
        let crowded_default = host(10, true);
        let empty = host(10, false);
        let table = table_with(vec![empty.clone(), crowded_default.clone()]).await;

        // Put two tenants on the default first; it should still win the
        // tie-break over the emptier non-default host.
        table
            .assign_host(&create("a"), &HostConstraints::default())
            .await
            .unwrap();
        let second = table
            .assign_host(&create("b"), &HostConstraints::default())
            .await
            .unwrap();
        assert_eq!(second.host_id, crowded_default.id);
    }

    #[tokio::test]
    async fn test_assign_tie_breaks_on_count_then_id() {
        let mut a = host(10, false);
        let mut b = host(10, false);
        // Force a deterministic id order.
        if b.id < a.id {
            std::mem::swap(&mut a, &mut b);
        }
        let table = table_with(vec![a.clone(), b.clone()]).await;

        let first = table
            .assign_host(&create("a"), &HostConstraints::default())
            .await
            .unwrap();
        assert_eq!(first.host_id, a.id, "equal counts fall back to lowest id");

        let second = table
            .assign_host(&create("b"), &HostConstraints::default())
            .await
            .unwrap();
        assert_eq!(second.host_id, b.id, "lower count wins next");
    }

    #[tokio::test]
    async fn test_assign_no_capacity() {
        let table = table_with(vec![host(1, false)]).await;
        table
            .assign_host(&create("a"), &HostConstraints::default())
            .await
            .unwrap();
        let err = table
            .assign_host(&create("b"), &HostConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoCapacity));
    }

    #[tokio::test]
    async fn test_concurrent_provisioning_never_overbooks() {
        let capacity = 3u32;
        let table = table_with(vec![host(capacity, false)]).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                table
                    .assign_host(&create(&format!("t{i}")), &HostConstraints::default())
                    .await
            }));
        }

        let mut ok = 0;
        let mut no_capacity = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::NoCapacity) => no_capacity += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, capacity);
        assert_eq!(no_capacity, 8 - capacity);
    }

    #[tokio::test]
    async fn test_resolve_unknown_tenant() {
        let table = table_with(vec![host(1, false)]).await;
        let err = table.resolve_connection(TenantId::new()).await.unwrap_err();
        assert!(matches!(err, Error::TenantNotFound { .. }));
    }

    #[tokio::test]
    async fn test_resolve_suspended_tenant_unavailable() {
        let table = table_with(vec![host(2, false)]).await;
        let tenant = table
            .assign_host(&create("acme"), &HostConstraints::default())
            .await
            .unwrap();
        table
            .set_tenant_status(tenant.id, TenantStatus::Active)
            .await
            .unwrap();
        assert!(table.resolve_connection(tenant.id).await.is_ok());

        table
            .set_tenant_status(tenant.id, TenantStatus::Suspended)
            .await
            .unwrap();
        let err = table.resolve_connection(tenant.id).await.unwrap_err();
        assert!(matches!(err, Error::TenantUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_deleting_tenant_frees_the_slot() {
        let table = table_with(vec![host(1, false)]).await;
        let tenant = table
            .assign_host(&create("a"), &HostConstraints::default())
            .await
            .unwrap();
        table
            .set_tenant_status(tenant.id, TenantStatus::Deleted)
            .await
            .unwrap();

        // Slot is free again.
        assert!(
            table
                .assign_host(&create("b"), &HostConstraints::default())
                .await
                .is_ok()
        );

        // And the terminal tenant rejects further changes.
        let unchanged = table
            .set_tenant_status(tenant.id, TenantStatus::Active)
            .await
            .unwrap();
        assert_eq!(unchanged.status, TenantStatus::Deleted);
    }

    #[tokio::test]
    async fn test_constraints_filter_hosts() {
        let mut eu = host(5, false);
        eu.region = Some("eu-west".into());
        let mut us = host(5, false);
        us.region = Some("us-east".into());
        let table = table_with(vec![eu.clone(), us]).await;

        let tenant = table
            .assign_host(
                &create("acme"),
                &HostConstraints {
                    region: Some("eu-west".into()),
                    tier: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(tenant.host_id, eu.id);

        let err = table
            .assign_host(
                &create("other"),
                &HostConstraints {
                    region: Some("ap-south".into()),
                    tier: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoCapacity));
    }
}
