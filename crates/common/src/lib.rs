//! Shared ids and time helpers used across all tidechat crates.

pub mod ids;
pub mod time;

pub use {
    ids::{ChannelId, ChatId, HostId, MessageId, TenantId},
    time::now_ms,
};
