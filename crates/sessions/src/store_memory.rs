//! In-memory channel store for tests and ephemeral deployments.

use {
    async_trait::async_trait, std::collections::HashMap, tidechat_common::ChannelId,
    tokio::sync::Mutex,
};

use crate::{Result, store::ChannelStore, types::Channel};

#[derive(Default)]
pub struct MemoryChannelStore {
    channels: Mutex<HashMap<ChannelId, Channel>>,
}

impl MemoryChannelStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelStore for MemoryChannelStore {
    async fn save(&self, channel: &Channel) -> Result<()> {
        self.channels.lock().await.insert(channel.id, channel.clone());
        Ok(())
    }

    async fn get(&self, id: ChannelId) -> Result<Option<Channel>> {
        Ok(self.channels.lock().await.get(&id).cloned())
    }

    async fn find_by_instance(&self, instance: &str) -> Result<Option<Channel>> {
        Ok(self
            .channels
            .lock()
            .await
            .values()
            .find(|c| c.external_instance_name == instance)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Channel>> {
        Ok(self.channels.lock().await.values().cloned().collect())
    }

    async fn delete(&self, id: ChannelId) -> Result<()> {
        self.channels.lock().await.remove(&id);
        Ok(())
    }
}
