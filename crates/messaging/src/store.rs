//! Persistence trait for message rows.

use {
    async_trait::async_trait,
    tidechat_common::{MessageId, TenantId},
};

use crate::{Result, types::Message};

/// Persistence backend for messages, scoped to one tenant database.
///
/// Implementations are handed out by the storage layer after tenant routing;
/// no store ever spans tenants.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn get(&self, tenant_id: TenantId, id: MessageId) -> Result<Option<Message>>;
    async fn get_by_external_id(
        &self,
        tenant_id: TenantId,
        external_id: &str,
    ) -> Result<Option<Message>>;
    async fn upsert(&self, message: &Message) -> Result<()>;
}
