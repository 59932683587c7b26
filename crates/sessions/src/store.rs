//! Persistence trait for channels.

use {async_trait::async_trait, tidechat_common::ChannelId};

use crate::{Result, types::Channel};

/// Storage backend for channel records.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn save(&self, channel: &Channel) -> Result<()>;
    async fn get(&self, id: ChannelId) -> Result<Option<Channel>>;
    async fn find_by_instance(&self, instance: &str) -> Result<Option<Channel>>;
    async fn list(&self) -> Result<Vec<Channel>>;
    async fn delete(&self, id: ChannelId) -> Result<()>;
}
