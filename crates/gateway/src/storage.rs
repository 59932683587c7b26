//! Tenant-routed message storage.
//!
//! Every message read or write first resolves the tenant's database host
//! through the routing table, then runs against a per-tenant store. Pools
//! are opened lazily and cached for the life of the process.

use {
    async_trait::async_trait,
    std::{collections::HashMap, path::PathBuf, sync::Arc},
    tidechat_common::{MessageId, TenantId},
    tidechat_messaging::{Message, MessageStore, SqliteMessageStore},
    tidechat_tenancy::RoutingTable,
    tokio::sync::RwLock,
    tracing::debug,
};

type Result<T> = tidechat_messaging::Result<T>;

/// A [`MessageStore`] that routes each call to the owning tenant's database.
pub struct RoutedMessageStore {
    routing: Arc<RoutingTable>,
    data_dir: PathBuf,
    stores: RwLock<HashMap<TenantId, Arc<SqliteMessageStore>>>,
}

impl RoutedMessageStore {
    #[must_use]
    pub fn new(routing: Arc<RoutingTable>, data_dir: PathBuf) -> Self {
        Self {
            routing,
            data_dir,
            stores: RwLock::new(HashMap::new()),
        }
    }

    async fn store_for(&self, tenant_id: TenantId) -> Result<Arc<SqliteMessageStore>> {
        if let Some(store) = self.stores.read().await.get(&tenant_id) {
            return Ok(Arc::clone(store));
        }

        // Routing errors (unknown tenant, suspended tenant) surface here so
        // no tenant data is ever written to the wrong database.
        let params = self
            .routing
            .resolve_connection(tenant_id)
            .await
            .map_err(tidechat_messaging::Error::routing)?;

        let db_path = self.data_dir.join(format!("{}.db", params.database_name));
        let url = format!("sqlite:{}?mode=rwc", db_path.display());
        let store = Arc::new(SqliteMessageStore::new(&url).await?);
        debug!(tenant = %tenant_id, database = %params.database_name, "tenant message store opened");

        let mut stores = self.stores.write().await;
        // A concurrent call may have opened it first; keep the existing one.
        Ok(Arc::clone(
            stores.entry(tenant_id).or_insert(store),
        ))
    }
}

#[async_trait]
impl MessageStore for RoutedMessageStore {
    async fn get(&self, tenant_id: TenantId, id: MessageId) -> Result<Option<Message>> {
        self.store_for(tenant_id).await?.get(tenant_id, id).await
    }

    async fn get_by_external_id(
        &self,
        tenant_id: TenantId,
        external_id: &str,
    ) -> Result<Option<Message>> {
        self.store_for(tenant_id)
            .await?
            .get_by_external_id(tenant_id, external_id)
            .await
    }

    async fn upsert(&self, message: &Message) -> Result<()> {
        self.store_for(message.tenant_id).await?.upsert(message).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        tidechat_common::ChatId,
        tidechat_tenancy::{
            DatabaseHost, HostConstraints, HostStatus, MemoryTenancyStore, TenantCreate,
            TenantStatus,
        },
    };

    async fn routing_with_tenant() -> (Arc<RoutingTable>, TenantId) {
        let routing = Arc::new(
            RoutingTable::load(Arc::new(MemoryTenancyStore::new()))
                .await
                .unwrap(),
        );
        routing
            .register_host(DatabaseHost {
                id: tidechat_common::HostId::new(),
                address: "db.internal".into(),
                port: 5432,
                region: None,
                tier: None,
                max_tenants: 4,
                disk_capacity_gb: 64,
                is_default: true,
                status: HostStatus::Active,
            })
            .await
            .unwrap();
        let tenant = routing
            .assign_host(
                &TenantCreate {
                    slug: "acme".into(),
                    region: None,
                    tier: None,
                },
                &HostConstraints::default(),
            )
            .await
            .unwrap();
        let tenant = routing
            .set_tenant_status(tenant.id, TenantStatus::Active)
            .await
            .unwrap();
        (routing, tenant.id)
    }

    #[tokio::test]
    async fn test_routes_to_tenant_database() {
        let (routing, tenant_id) = routing_with_tenant().await;
        let dir = tempfile::tempdir().unwrap();
        let store = RoutedMessageStore::new(routing, dir.path().to_path_buf());

        let message = Message::outbound(tenant_id, ChatId::new(), "hello");
        store.upsert(&message).await.unwrap();
        assert_eq!(store.get(tenant_id, message.id).await.unwrap(), Some(message));

        // The tenant's database file exists on disk.
        assert!(dir.path().join("tenant_acme.db").exists());
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_a_routing_error() {
        let (routing, _) = routing_with_tenant().await;
        let dir = tempfile::tempdir().unwrap();
        let store = RoutedMessageStore::new(routing, dir.path().to_path_buf());

        let err = store
            .get(TenantId::new(), MessageId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, tidechat_messaging::Error::Routing { .. }));
    }
}
