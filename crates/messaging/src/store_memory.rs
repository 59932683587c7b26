//! In-memory message store for tests.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    tidechat_common::{MessageId, TenantId},
    tokio::sync::Mutex,
};

use crate::{Result, store::MessageStore, types::Message};

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: Mutex<HashMap<(TenantId, MessageId), Message>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn get(&self, tenant_id: TenantId, id: MessageId) -> Result<Option<Message>> {
        Ok(self.messages.lock().await.get(&(tenant_id, id)).cloned())
    }

    async fn get_by_external_id(
        &self,
        tenant_id: TenantId,
        external_id: &str,
    ) -> Result<Option<Message>> {
        Ok(self
            .messages
            .lock()
            .await
            .values()
            .find(|m| {
                m.tenant_id == tenant_id && m.external_message_id.as_deref() == Some(external_id)
            })
            .cloned())
    }

    async fn upsert(&self, message: &Message) -> Result<()> {
        self.messages
            .lock()
            .await
            .insert((message.tenant_id, message.id), message.clone());
        Ok(())
    }
}
